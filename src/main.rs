use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use masked_tab_transformer::{
    loss_mask, settings, AdamTrainer, FeatureBatch, LossMode, MaskedFTTransformer, ModelConfig, ModelError,
    NumericalEmbeddingType, ReferenceFrame, TrainingConfig,
};

type DemoBackend = Autodiff<NdArray<f32>>;

const ROWS: usize = 64;
const STEPS: usize = 20;
const MASK_RATE: f64 = 0.15;
const MASK_SENTINEL: f32 = -1.0;

fn main() -> Result<(), ModelError> {
    println!("masked-tab-transformer demo starting...");

    let process = settings();
    let mut rng = StdRng::seed_from_u64(process.training.seed);
    let device = Default::default();

    // Synthetic table: income loosely follows age, city is uniform.
    let city: Vec<f32> = (0..ROWS).map(|_| rng.random_range(0..4) as f32).collect();
    let age: Vec<f32> = (0..ROWS).map(|_| rng.random_range(0.2f32..0.7)).collect();
    let income: Vec<f32> = age.iter().map(|a| a * 1.5 + rng.random_range(-0.1f32..0.1)).collect();

    let reference = ReferenceFrame::new()
        .with_column("city", city)
        .with_column("age", age)
        .with_column("income", income);

    let config = ModelConfig::new(["city"], ["age", "income"])
        .with_embedding_dim(16)
        .with_depth(2)
        .with_heads(4)
        .with_numerical_embedding(NumericalEmbeddingType::PiecewiseLinear, Some(8))
        .with_loss_mode(LossMode::MaskedOnly)
        .with_explainable(true);

    let model = MaskedFTTransformer::<DemoBackend>::new(&config, &reference, &device)?;
    let mut trainer = AdamTrainer::new(model, &TrainingConfig::from_settings());

    let target: FeatureBatch<DemoBackend> = reference.to_batch(&device);
    let names: Vec<String> = trainer.model().schema().ordered_names().map(str::to_string).collect();

    for step in 0..STEPS {
        // Mask upstream: hide random cells behind a sentinel, keep the
        // unmasked batch as the target.
        let flags: Vec<bool> = (0..ROWS * names.len()).map(|_| rng.random_bool(MASK_RATE)).collect();
        let mut input = FeatureBatch::new();
        for (column, name) in names.iter().enumerate() {
            let values = reference.column(name)?;
            let masked: Vec<f32> = values
                .iter()
                .enumerate()
                .map(|(row, &v)| if flags[row * names.len() + column] { MASK_SENTINEL } else { v })
                .collect();
            input.insert_values(name.clone(), &masked, &device);
        }
        let mask = loss_mask(&flags, [ROWS, names.len()], &device)?;

        let results = trainer.train_step_with_target(&input, &target, Some(mask))?;
        if step % 5 == 0 || step + 1 == STEPS {
            println!("step {step:>3}: {results:?}");
        }
    }

    let output = trainer.model().forward(&target)?;
    if let Some(importances) = output.importances {
        let importances = importances.mean_dim(0);
        let values: Vec<f32> = importances.into_data().iter::<f32>().collect();
        for (name, value) in names.iter().zip(values) {
            println!("importance {name:>8}: {value:.4}");
        }
    }

    let full_mask = loss_mask(&vec![true; ROWS * names.len()], [ROWS, names.len()], &device)?;
    println!("evaluation loss: {:.6}", trainer.evaluate_with_target(&target, &target, Some(full_mask))?);
    Ok(())
}
