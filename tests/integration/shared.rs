use std::sync::Mutex;
use std::sync::OnceLock;

use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn random_string() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

pub fn setup() {
    dotenvy::from_filename(".env.test").ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// A storage handle isolated under a random key namespace.
pub fn storage() -> switchyard::Storage {
    setup();
    switchyard::Storage::builder()
        .from_env()
        .expect("invalid Redis DSN")
        .namespace(random_string())
        .build()
        .expect("Failed to create Redis pool")
}

pub fn context() -> switchyard::Context {
    switchyard::Context::new(storage(), test_registry())
}

pub fn test_registry() -> switchyard::HandlerRegistry {
    let mut registry = switchyard::HandlerRegistry::new();
    registry.register::<NoopJob>("NoopJob");
    registry.register::<TouchJob>("TouchJob");
    registry.register::<FailingJob>("FailingJob");
    registry.register::<PanickingJob>("PanickingJob");
    registry
}

/// Tokens recorded by `TouchJob` performs; tests isolate themselves with
/// unique tokens rather than clearing the list.
fn touched() -> &'static Mutex<Vec<String>> {
    static TOUCHED: OnceLock<Mutex<Vec<String>>> = OnceLock::new();
    TOUCHED.get_or_init(|| Mutex::new(Vec::new()))
}

pub fn was_touched(token: &str) -> bool {
    touched().lock().unwrap().iter().any(|t| t == token)
}

#[derive(Serialize, Deserialize)]
pub struct NoopJob {}

#[async_trait::async_trait]
impl switchyard::JobHandler for NoopJob {
    async fn perform(
        &mut self,
        _: &switchyard::JobContext,
    ) -> Result<(), switchyard::JobError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
pub struct TouchJob {
    pub token: String,
}

#[async_trait::async_trait]
impl switchyard::JobHandler for TouchJob {
    async fn perform(
        &mut self,
        _: &switchyard::JobContext,
    ) -> Result<(), switchyard::JobError> {
        touched().lock().unwrap().push(self.token.clone());
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
pub struct FailingJob {}

#[async_trait::async_trait]
impl switchyard::JobHandler for FailingJob {
    async fn perform(
        &mut self,
        _: &switchyard::JobContext,
    ) -> Result<(), switchyard::JobError> {
        Err("handler exploded".into())
    }
}

#[derive(Serialize, Deserialize)]
pub struct PanickingJob {}

#[async_trait::async_trait]
impl switchyard::JobHandler for PanickingJob {
    async fn perform(
        &mut self,
        _: &switchyard::JobContext,
    ) -> Result<(), switchyard::JobError> {
        panic!("kaboom");
    }
}
