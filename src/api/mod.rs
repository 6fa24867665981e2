mod cli;
mod error;
mod payload;
mod response;

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Json, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use cli::{Cli, Command};
pub use error::{ApiError, ErrorResponse, error_response, json_response};
pub use payload::{
    DEFAULT_PATHS, EndAgePayload, ModeToken, SimulatePayload, SolvePayload, TradeoffPayload,
    include_paths, layered_parameters, run_mode, timeout,
};
pub use response::{
    CompareResponse, PathSummary, SimulateResponse, SolveResponse, StressScenariosResponse,
    close_calls, failure_examples,
};

use crate::core::{
    RunControl, RunOptions, SimulationParameters, StressScenario, compare, end_age_query,
    generate_sequences, legacy_tradeoff, run, solve_goal,
};

fn to_json<T: Serialize>(body: &T) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Internal(e.to_string()))
}

fn run_options(layers: &[&SimulatePayload], record_trajectories: bool) -> RunOptions {
    RunOptions {
        record_trajectories,
        control: timeout(layers).map(RunControl::with_timeout).unwrap_or_default(),
    }
}

pub fn simulate(layers: &[&SimulatePayload]) -> Result<Value, ApiError> {
    let params = layered_parameters(layers)?;
    let mode = run_mode(layers)?;
    let include_paths = include_paths(layers);
    let report = run(&params, mode, &run_options(layers, include_paths))?;
    to_json(&SimulateResponse::new(&params, &report, include_paths))
}

pub fn end_age(payload: &EndAgePayload) -> Result<Value, ApiError> {
    let (start_age, mortality) = payload.resolve();
    to_json(&end_age_query(start_age, &mortality)?)
}

pub fn solve(layers: &[&SimulatePayload], goal: &SolvePayload) -> Result<Value, ApiError> {
    let params = layered_parameters(layers)?;
    let config = goal.to_config(&params, run_mode(layers)?);
    let result = solve_goal(&params, config, &run_options(layers, false))?;
    to_json(&SolveResponse {
        parameters: &params,
        result,
    })
}

pub fn tradeoff(layers: &[&SimulatePayload], levels: Option<&[f64]>) -> Result<Value, ApiError> {
    let params = layered_parameters(layers)?;
    let mode = run_mode(layers)?;
    to_json(&legacy_tradeoff(&params, mode, levels, &run_options(layers, false))?)
}

pub fn compare_plans(
    base_layers: &[&SimulatePayload],
    variant: &SimulatePayload,
) -> Result<Value, ApiError> {
    let mode = run_mode(base_layers)?;
    let mut variant_layers = base_layers.to_vec();
    variant_layers.push(variant);

    let mut base = layered_parameters(base_layers)?;
    let mut other = layered_parameters(&variant_layers)?;
    base.mortality.enabled = mode.mortality_enabled(&base);
    other.mortality.enabled = mode.mortality_enabled(&other);

    let sequences = generate_sequences(&base, mode)?;
    let comparison = compare(&base, &other, &sequences, &run_options(base_layers, false))?;
    to_json(&CompareResponse {
        mode,
        paths: sequences.len(),
        comparison,
    })
}

pub fn defaults() -> Result<Value, ApiError> {
    to_json(&SimulationParameters::default())
}

pub fn stress_scenarios() -> Result<Value, ApiError> {
    to_json(&StressScenariosResponse {
        scenarios: StressScenario::ALL.iter().map(|s| s.info()).collect(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ComparePayload {
    pub base: SimulatePayload,
    pub variant: SimulatePayload,
}

pub fn router() -> Router {
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/end-age",
            get(end_age_get_handler).post(end_age_post_handler),
        )
        .route("/api/defaults", get(defaults_handler))
        .route("/api/stress-scenarios", get(stress_scenarios_handler))
        .route("/api/solve", post(solve_handler))
        .route("/api/compare", post(compare_handler))
        .route("/api/tradeoff", post(tradeoff_handler))
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "FIRE simulator API listening");
    info!("local access: http://127.0.0.1:{port}/api/defaults");

    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!(error = %err, "cannot listen for ctrl-c; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

/// Simulations are CPU-bound; keep them off the async workers.
async fn blocking<F>(work: F) -> Response
where
    F: FnOnce() -> Result<Value, ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(err)) => err.into_response(),
        Err(join) => ApiError::Internal(join.to_string()).into_response(),
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::Payload(rejection.body_text()))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    blocking(move || simulate(&[&payload])).await
}

async fn simulate_post_handler(body: Result<Json<SimulatePayload>, JsonRejection>) -> Response {
    match json_body(body) {
        Ok(payload) => blocking(move || simulate(&[&payload])).await,
        Err(err) => err.into_response(),
    }
}

async fn end_age_get_handler(Query(payload): Query<EndAgePayload>) -> Response {
    respond(end_age(&payload))
}

async fn end_age_post_handler(body: Result<Json<EndAgePayload>, JsonRejection>) -> Response {
    respond(json_body(body).and_then(|payload| end_age(&payload)))
}

async fn defaults_handler() -> Response {
    respond(defaults())
}

async fn stress_scenarios_handler() -> Response {
    respond(stress_scenarios())
}

async fn solve_handler(body: Result<Json<SolvePayload>, JsonRejection>) -> Response {
    match json_body(body) {
        Ok(payload) => blocking(move || solve(&[&payload.params], &payload)).await,
        Err(err) => err.into_response(),
    }
}

async fn compare_handler(body: Result<Json<ComparePayload>, JsonRejection>) -> Response {
    match json_body(body) {
        Ok(payload) => blocking(move || compare_plans(&[&payload.base], &payload.variant)).await,
        Err(err) => err.into_response(),
    }
}

async fn tradeoff_handler(body: Result<Json<TradeoffPayload>, JsonRejection>) -> Response {
    match json_body(body) {
        Ok(payload) => {
            blocking(move || tradeoff(&[&payload.params], payload.levels.as_deref())).await
        }
        Err(err) => err.into_response(),
    }
}

fn respond(result: Result<Value, ApiError>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => err.into_response(),
    }
}

pub async fn run_cli(cli: Cli) -> Result<(), ApiError> {
    let output = match cli.command {
        Command::Serve { port } => {
            return run_http_server(port)
                .await
                .map_err(|e| ApiError::Internal(format!("server error: {e}")));
        }
        Command::Simulate(plan) => {
            let layers = plan.layers()?;
            simulate(&layers.iter().collect::<Vec<_>>())?
        }
        Command::EndAge(args) => end_age(&args.payload())?,
        Command::Solve(args) => {
            let layers = args.plan.layers()?;
            solve(&layers.iter().collect::<Vec<_>>(), &args.payload())?
        }
        Command::Compare(args) => {
            let layers = args.plan.layers()?;
            let variant = args.variant_layer()?;
            compare_plans(&layers.iter().collect::<Vec<_>>(), &variant)?
        }
        Command::Tradeoff(args) => {
            let layers = args.plan.layers()?;
            tradeoff(&layers.iter().collect::<Vec<_>>(), args.levels())?
        }
        Command::Scenarios => stress_scenarios()?,
    };
    let text = serde_json::to_string_pretty(&output).map_err(|e| ApiError::Internal(e.to_string()))?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::{HeaderValue, header};

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("body is json")
    }

    fn payload(json: &str) -> SimulatePayload {
        serde_json::from_str(json).expect("payload parses")
    }

    #[tokio::test]
    async fn simulate_post_returns_a_report() {
        let body = payload(r#"{"paths": 200, "seed": 11}"#);
        let response = simulate_post_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );

        let json = body_json(response).await;
        assert_eq!(json["completedPaths"], 200);
        assert_eq!(json["horizon"]["endAge"], 95);
        let rate = json["aggregate"]["successRate"].as_f64().expect("rate");
        assert!((0.0..=1.0).contains(&rate));
    }

    #[tokio::test]
    async fn simulate_rejects_oversized_path_counts() {
        let body = payload(r#"{"paths": 100001}"#);
        let response = simulate_post_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["field"], "paths");
    }

    #[tokio::test]
    async fn simulate_reports_empty_input_as_unprocessable() {
        let body = payload(r#"{"paths": 0}"#);
        let response = simulate_post_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn historical_get_runs_every_start_year() {
        let query = payload(r#"{"mode": "historical", "firstYear": 1900, "lastYear": 1909}"#);
        let response = simulate_get_handler(Query(query)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["completedPaths"], 10);
        assert_eq!(json["mortalityApplied"], false);
        let historical = json["aggregate"]["historical"].as_array().expect("per-year outcomes");
        assert_eq!(historical.len(), 10);
    }

    #[tokio::test]
    async fn end_age_defaults_to_average_moderate_at_47() {
        let response = end_age_get_handler(Query(EndAgePayload::default())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["endAge"], 97);
        assert_eq!(json["healthClass"], "average");
    }

    #[tokio::test]
    async fn end_age_rejects_start_at_the_table_limit() {
        let body: EndAgePayload = serde_json::from_str(r#"{"startAge": 110}"#).unwrap();
        let response = end_age_post_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["field"], "startAge");
    }

    #[tokio::test]
    async fn stress_scenarios_lists_all_eight() {
        let json = body_json(stress_scenarios_handler().await).await;
        let scenarios = json["scenarios"].as_array().expect("list");
        assert_eq!(scenarios.len(), 8);
        assert!(scenarios.iter().any(|s| s["id"] == "great-depression"));
    }

    #[tokio::test]
    async fn defaults_echo_the_documented_plan() {
        let json = body_json(defaults_handler().await).await;
        assert_eq!(json["startingPortfolio"], 1_200_000.0);
        assert_eq!(json["startAge"], 47);
        assert_eq!(json["windfalls"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn unknown_routes_are_json_404s() {
        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Not found");
    }

    #[tokio::test]
    async fn compare_shares_sequences_between_plans() {
        let body: ComparePayload = serde_json::from_str(
            r#"{"base": {"paths": 300, "windfalls": []},
                "variant": {"windfalls": [{"age": 60, "amount": 500000}]}}"#,
        )
        .unwrap();
        let response = compare_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["paths"], 300);
        let delta = json["delta"]["medianFinal"].as_f64().expect("delta");
        assert!(delta > 0.0);
    }

    #[tokio::test]
    async fn solve_finds_a_portfolio_for_a_modest_target() {
        let body: SolvePayload = serde_json::from_str(
            r#"{"goal": "required-portfolio", "targetSuccessRate": 0.8,
                "maxIterations": 12, "pathsPerIteration": 200, "finalPaths": 300,
                "params": {"mortalityEnabled": false}}"#,
        )
        .unwrap();
        let response = solve_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["iterations"].as_array().is_some_and(|i| !i.is_empty()));
        assert_eq!(json["config"]["goalType"], "required-portfolio");
    }

    #[tokio::test]
    async fn tradeoff_sweeps_the_requested_levels() {
        let body: TradeoffPayload = serde_json::from_str(
            r#"{"levels": [300000, 900000, 1500000],
                "params": {"paths": 150, "mortalityEnabled": false}}"#,
        )
        .unwrap();
        let response = tradeoff_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let curve = json["curve"].as_array().expect("curve");
        assert_eq!(curve.len(), 3);
        assert_eq!(curve[1]["portfolio"], 900_000.0);
        assert!(curve[0]["portfolioMultiple"].as_f64().is_some_and(|m| m > 0.0));
        assert_eq!(json["mode"]["mode"], "monte-carlo");
    }

    #[tokio::test]
    async fn tradeoff_rejects_an_empty_level_list() {
        let body: TradeoffPayload = serde_json::from_str(r#"{"levels": []}"#).unwrap();
        let response = tradeoff_handler(Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn flag_layers_override_file_layers() {
        let file = payload(r#"{"paths": 40, "mode": "monte-carlo", "annualExpenses": 30000}"#);
        let flags = payload(r#"{"paths": 25}"#);
        let json = simulate(&[&file, &flags]).expect("runs");
        assert_eq!(json["completedPaths"], 25);
        assert_eq!(json["parameters"]["annualExpenses"], 30_000.0);
    }
}
