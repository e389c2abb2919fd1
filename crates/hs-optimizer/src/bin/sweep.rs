use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hs_optimizer::{
    Evaluation, EvaluationRequest, Evaluator, RunConfig, TrialEvent, TrialRunner,
};
use hs_template::{Dialect, Expander, Template};
use hs_types::{config_path_from_env, load_json_file, Assignment, SearchSpace};

const MODEL_TEMPLATE: &str = r#"model = Sequential()
model.add(Dense(512, input_shape=(784,)))
model.add(Activation({{activation:string}}))
model.add(Dropout({{dropout:number}}))
model.add(Dense({{width:number}}))
model.add(Activation({{activation:string}}))
model.add(Dropout({{dropout_2:number}}))
if {{extra_layer:bool}}:
    model.add(Dense(100))
    model.add(Dropout(0.5))
model.add(Dense(10))
model.add(Activation("softmax"))
model.compile(loss="categorical_crossentropy", metrics=["accuracy"], optimizer={{optimizer:string}})
model.fit(x_train, y_train, batch_size={{batch_size:number}}, epochs=1, verbose=2)
"#;

fn model_space() -> SearchSpace {
    SearchSpace::new()
        .add_uniform("dropout", 0.0, 1.0)
        .add_choice("width", vec![json!(256), json!(512), json!(1024)])
        .add_choice("activation", vec![json!("relu"), json!("sigmoid")])
        .add_uniform("dropout_2", 0.0, 1.0)
        .add_flag("extra_layer")
        .add_choice("optimizer", vec![json!("rmsprop"), json!("adam"), json!("sgd")])
        .add_choice("batch_size", vec![json!(64), json!(128)])
}

/// Settings for the demo sweep, read from the JSON file named by
/// `HYPERSWEEP_CONFIG`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct SweepConfig {
    run: RunConfig,
    /// Replaces the built-in model template.
    template: Option<String>,
    dialect: Dialect,
    /// Render markers as `binding["name"]` lookups instead of literals.
    lookup_binding: Option<String>,
    /// Simulated training length per trial.
    epochs: usize,
    epoch_millis: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::new("mnist-mlp".to_string(), model_space(), "tpe")
                .with_max_evaluations(30)
                .with_tpe_startup_trials(8)
                .with_description("two-layer MLP on MNIST, synthetic objective"),
            template: None,
            dialect: Dialect::Python,
            lookup_binding: None,
            epochs: 5,
            epoch_millis: 20,
        }
    }
}

fn load_config() -> anyhow::Result<SweepConfig> {
    let mut config = match config_path_from_env("HYPERSWEEP_CONFIG")? {
        Some(path) => load_json_file::<SweepConfig>(&path)
            .with_context(|| format!("failed to load sweep config {}", path.display()))?,
        None => SweepConfig::default(),
    };
    if config.run.search_space.is_empty() {
        config.run.search_space = model_space();
    }
    Ok(config)
}

/// Stands in for a training job: scores an assignment with a smooth
/// accuracy surface plus noise. Lower score is better, so it reports
/// negative accuracy.
struct SyntheticAccuracy {
    rng: StdRng,
    epochs: usize,
    epoch: Duration,
}

impl SyntheticAccuracy {
    fn new(config: &SweepConfig) -> Self {
        let rng = match config.run.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            epochs: config.epochs,
            epoch: Duration::from_millis(config.epoch_millis),
        }
    }

    fn accuracy(&mut self, a: &Assignment) -> anyhow::Result<f64> {
        let num = |name: &str| a.get(name).and_then(|v| v.as_f64()).unwrap_or_default();
        let text = |name: &str| a.get(name).and_then(|v| v.as_str()).unwrap_or_default();

        let dropout = num("dropout");
        let optimizer = text("optimizer");
        if optimizer == "sgd" && dropout > 0.85 {
            bail!("loss diverged (sgd with dropout {dropout:.2})");
        }

        let mut acc = 0.97;
        acc -= 0.3 * (dropout - 0.2).powi(2);
        acc -= 0.2 * (num("dropout_2") - 0.3).powi(2);
        acc += 0.01 * (num("width") / 256.0).log2();
        acc += match optimizer {
            "adam" => 0.01,
            "rmsprop" => 0.005,
            _ => -0.02,
        };
        if text("activation") == "sigmoid" {
            acc -= 0.015;
        }
        if a.get("extra_layer").and_then(|v| v.as_bool()) == Some(true) {
            acc += 0.003;
        }
        if num("batch_size") > 64.0 {
            acc -= 0.002;
        }
        acc += self.rng.random_range(-0.005..0.005);
        Ok(acc.clamp(0.0, 1.0))
    }
}

impl Evaluator<String> for SyntheticAccuracy {
    fn evaluate(&mut self, request: &EvaluationRequest) -> anyhow::Result<Evaluation<String>> {
        for _ in 0..self.epochs {
            if request.cancellation.is_cancelled() {
                bail!("training interrupted");
            }
            std::thread::sleep(self.epoch);
        }
        let acc = self.accuracy(&request.assignment)?;
        Ok(Evaluation::new(-acc, format!("weights-trial-{}.h5", request.trial_number))
            .with_metric("accuracy", acc))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let template = Template::parse(config.template.as_deref().unwrap_or(MODEL_TEMPLATE))?;
    let mut expander = Expander::new(config.dialect);
    if let Some(binding) = &config.lookup_binding {
        expander = expander.with_lookup(binding.as_str());
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let runner = TrialRunner::new(config.run.clone())
        .with_template(template, expander)
        .with_events(tx);
    let token = runner.cancellation_token();

    let progress = std::thread::spawn(move || {
        for event in rx {
            match event {
                TrialEvent::Finished { number, score: Some(score), .. } => {
                    println!("trial {number:>3}: accuracy {:.4}", -score)
                }
                TrialEvent::Finished { number, score: None, .. } => {
                    println!("trial {number:>3}: failed")
                }
                TrialEvent::NewBest { number, score, .. } => {
                    println!("trial {number:>3}: new best {:.4}", -score)
                }
                TrialEvent::Started { .. } => {}
            }
        }
    });

    let evaluator = SyntheticAccuracy::new(&config);
    let mut search = tokio::task::spawn_blocking(move || runner.run(evaluator));
    let result = tokio::select! {
        joined = &mut search => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, stopping after the current trial");
            token.cancel();
            search.await?
        }
    };
    // The runner owned the sender, so the progress thread drains and exits.
    if progress.join().is_err() {
        warn!("progress reporter panicked");
    }

    let outcome = result?;
    let best = outcome.best_trial();
    info!(
        trial = best.number,
        score = outcome.best_score(),
        cancelled = outcome.was_cancelled(),
        "sweep done"
    );

    println!();
    println!("best assignment: {}", outcome.best_assignment());
    println!("best accuracy:   {:.4}", -outcome.best_score());
    if let Some(artifact) = outcome.best_artifact() {
        println!("artifact:        {artifact}");
    }
    println!("best program:\n{}", best.program.as_deref().unwrap_or_default());
    Ok(())
}
