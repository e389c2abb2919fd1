use anyhow::bail;
use serde_json::json;

use hs_optimizer::{
    evaluator_fn, search, BayesianSearch, Evaluation, EvaluationRequest, GridSearch,
    ProgramSource, RandomSearch, RunConfig, RunState, ScriptedSearch, TpeSearch, TrialRunner,
};
use hs_template::{Dialect, Expander, Template};
use hs_types::{Assignment, HsError, SearchError, SearchSpace, TemplateError};

fn width_rate_space() -> SearchSpace {
    SearchSpace::new()
        .add_choice("width", vec![json!(256), json!(512), json!(1024)])
        .add_uniform("rate", 0.0, 1.0)
}

fn width_of(request: &EvaluationRequest) -> f64 {
    request
        .assignment
        .get("width")
        .and_then(|v| v.as_f64())
        .unwrap()
}

#[test]
fn every_success_is_recorded_and_best_is_minimum() {
    let space = SearchSpace::new()
        .add_uniform("x", -2.0, 2.0)
        .add_int("k", 0, 9);
    let outcome = search(
        ProgramSource::Direct,
        space,
        Box::new(RandomSearch::with_seed(1)),
        evaluator_fn(|req: &EvaluationRequest| {
            let x = req.assignment.get("x").and_then(|v| v.as_f64()).unwrap();
            let k = req.assignment.get("k").and_then(|v| v.as_f64()).unwrap();
            Ok(Evaluation::new(x * x + k, req.trial_number))
        }),
        25,
    )
    .unwrap();

    assert_eq!(outcome.history.len(), 25);
    assert_eq!(outcome.history.succeeded().count(), 25);
    let min = outcome
        .history
        .succeeded()
        .map(|t| t.score())
        .fold(f64::INFINITY, f64::min);
    assert_eq!(outcome.best_score(), min);
    assert_eq!(outcome.best_artifact(), Some(&outcome.best_trial().number));
    assert_eq!(outcome.status.state, RunState::Completed);
}

#[test]
fn single_success_wins_regardless_of_score() {
    let outcome = search(
        ProgramSource::Direct,
        width_rate_space(),
        Box::new(RandomSearch::with_seed(2)),
        evaluator_fn(|req: &EvaluationRequest| {
            if req.trial_number != 3 {
                bail!("out of memory");
            }
            Ok(Evaluation::new(1e9, "only"))
        }),
        6,
    )
    .unwrap();

    assert_eq!(outcome.best_trial().number, 3);
    assert_eq!(outcome.best_score(), 1e9);
    assert_eq!(outcome.history.failed_count(), 5);
    assert_eq!(outcome.status.trials_failed, 5);
}

#[test]
fn all_failures_is_no_successful_trial() {
    let err = search(
        ProgramSource::Direct,
        width_rate_space(),
        Box::new(RandomSearch::with_seed(3)),
        evaluator_fn(|_: &EvaluationRequest| -> anyhow::Result<Evaluation<()>> {
            bail!("kernel restarted")
        }),
        4,
    )
    .unwrap_err();

    assert!(err.is_no_successful_trial());
    assert!(matches!(
        err,
        HsError::Search(SearchError::NoSuccessfulTrial { attempted: 4 })
    ));
}

#[test]
fn widest_model_wins() {
    let script = [256, 512, 1024]
        .iter()
        .map(|w| Assignment::new().with("width", json!(w)).with("rate", 0.1))
        .collect();
    let template = Template::parse("Dense({{width:number}})\nDropout({{rate:number}})").unwrap();

    let outcome = search(
        ProgramSource::template(template),
        width_rate_space(),
        Box::new(ScriptedSearch::new(script)),
        evaluator_fn(|req: &EvaluationRequest| {
            let width = width_of(req);
            Ok(Evaluation::new(-(width / 1024.0), width as i64))
        }),
        3,
    )
    .unwrap();

    assert_eq!(outcome.best_score(), -1.0);
    assert_eq!(
        outcome.best_assignment().get("width").and_then(|v| v.as_i64()),
        Some(1024)
    );
    assert_eq!(
        outcome.best_trial().program.as_deref(),
        Some("Dense(1024)\nDropout(0.1)")
    );

    let (assignment, score, artifact) = outcome.into_best();
    assert_eq!(assignment.get("rate").and_then(|v| v.as_f64()), Some(0.1));
    assert_eq!(score, -1.0);
    assert_eq!(artifact, 1024);
}

#[test]
fn string_choice_expands_to_quoted_literal() {
    let space = SearchSpace::new().add_choice("x", vec![json!("a"), json!("b")]);
    let template = Template::parse("f({{x}})").unwrap();
    let assignment = Assignment::new().with("x", "b");

    let expander = Expander::default();
    let first = expander.expand(&template, &space, &assignment).unwrap();
    let second = expander.expand(&template, &space, &assignment).unwrap();
    assert_eq!(first, "f(\"b\")");
    assert_eq!(first, second);

    let json = Expander::new(Dialect::Json);
    assert_eq!(json.expand(&template, &space, &assignment).unwrap(), "f(\"b\")");
}

#[test]
fn missing_parameter_is_unresolved() {
    let template = Template::parse("Dense({{width}}, rate={{rate}})").unwrap();
    let assignment = Assignment::new().with("width", json!(512));
    let err = Expander::default()
        .expand(&template, &width_rate_space(), &assignment)
        .unwrap_err();
    assert_eq!(
        err,
        TemplateError::UnresolvedParameter {
            name: "rate".to_string()
        }
    );
}

#[test]
fn cancelled_run_returns_best_so_far() {
    let config = RunConfig::new("cancel".to_string(), width_rate_space(), "random")
        .with_max_evaluations(100)
        .with_seed(4);
    let runner = TrialRunner::new(config);
    let token = runner.cancellation_token();

    let outcome = runner
        .run(evaluator_fn(move |req: &EvaluationRequest| {
            if req.trial_number == 4 {
                token.cancel();
            }
            Ok(Evaluation::new(-width_of(req), ()))
        }))
        .unwrap();

    assert!(outcome.was_cancelled());
    assert_eq!(outcome.history.len(), 5);
    let min = outcome
        .history
        .trials()
        .iter()
        .map(|t| t.score())
        .fold(f64::INFINITY, f64::min);
    assert_eq!(outcome.best_score(), min);
}

#[test]
fn every_strategy_stays_in_the_space() {
    let space = SearchSpace::new()
        .add_uniform("dropout", 0.0, 1.0)
        .add_log_uniform("lr", 1e-4, 1e-1)
        .add_int("layers", 1, 4)
        .add_flag("batch_norm")
        .add_choice("optimizer", vec![json!("sgd"), json!("adam")]);
    let template = Template::parse(
        "net(layers={{layers}}, bn={{batch_norm:bool}}, opt={{optimizer:string}}, \
         lr={{lr:number}}, dropout={{dropout:number}})",
    )
    .unwrap();

    let strategies: Vec<Box<dyn hs_optimizer::SuggestionStrategy>> = vec![
        Box::new(RandomSearch::with_seed(5)),
        Box::new(GridSearch::new(3)),
        Box::new(BayesianSearch::with_seed(0.3, 5)),
        Box::new(TpeSearch::with_seed(5).with_startup(5)),
    ];
    for strategy in strategies {
        let name = strategy.name().to_string();
        let outcome = search(
            ProgramSource::template(template.clone()),
            space.clone(),
            strategy,
            evaluator_fn(|req: &EvaluationRequest| {
                let dropout = req.assignment.get("dropout").and_then(|v| v.as_f64()).unwrap();
                Ok(Evaluation::new(dropout, ()))
            }),
            30,
        )
        .unwrap_or_else(|e| panic!("{name} failed: {e}"));

        assert_eq!(outcome.history.len(), 30, "{name}");
        for trial in outcome.history.trials() {
            assert!(space.check_assignment(&trial.assignment).is_ok(), "{name}");
            assert!(trial.program.as_deref().unwrap().starts_with("net(layers="));
        }
    }
}

#[test]
fn lookup_mode_reaches_the_evaluator() {
    let template = Template::parse("Dense({{width}})").unwrap();
    let config = RunConfig::new("lookup".to_string(), width_rate_space(), "random")
        .with_max_evaluations(2)
        .with_seed(6);

    let outcome = TrialRunner::new(config)
        .with_template(template, Expander::new(Dialect::Python).with_lookup("space"))
        .run(evaluator_fn(|req: &EvaluationRequest| {
            assert_eq!(req.program.as_deref(), Some("Dense(space[\"width\"])"));
            Ok(Evaluation::new(-width_of(req), ()))
        }))
        .unwrap();
    assert_eq!(outcome.history.len(), 2);
    assert_eq!(outcome.history.failed_count(), 0);
}

#[test]
fn unsampleable_space_is_rejected_before_the_first_trial() {
    let narrow_high = f64::from_bits(1e300f64.to_bits() + 1);
    let spaces = [
        SearchSpace::new().add_uniform("x", -1e308, 1e308),
        SearchSpace::new().add_log_uniform("lr", 1e300, narrow_high),
    ];
    for space in spaces {
        let mut calls = 0;
        let err = search(
            ProgramSource::Direct,
            space,
            Box::new(RandomSearch::with_seed(1)),
            evaluator_fn(|_: &EvaluationRequest| {
                calls += 1;
                Ok(Evaluation::new(0.0, ()))
            }),
            2,
        )
        .unwrap_err();
        assert!(matches!(err, HsError::Validation(_)), "{err}");
        assert_eq!(calls, 0);
    }
}
