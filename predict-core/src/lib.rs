//! Prediction Pipeline Core Library
//!
//! Provides the pieces shared by every stage of the pipeline:
//! - Record types flowing through the pipeline
//! - The JSON wire codec for input and output messages
//! - Tracing initialisation

pub mod codec;
pub mod record;

// Re-export commonly used items
pub use codec::{decode, decode_result, encode, DecodeError};
pub use record::{InputRecord, PredictionResult};

/// Initialize tracing with standard configuration
///
/// Logs go to stderr; stdout is left to the stdio transport.
pub fn init_tracing(service_name: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(service_name)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize tracing with JSON output (for production)
pub fn init_tracing_json(service_name: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(service_name)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();
}

/// Default filter: the service itself plus the shared crates at `info`.
fn default_directives(service_name: &str) -> String {
    format!(
        "{}=info,predict_core=info,inference_engine=info",
        service_name.replace('-', "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        let record = InputRecord::new(3, vec![0.5]);
        assert_eq!(record.identifier, 3);
    }

    #[test]
    fn test_default_directives_normalise_crate_name() {
        let directives = default_directives("predict-service");
        assert!(directives.starts_with("predict_service=info"));
        assert!(directives.contains("inference_engine=info"));
    }
}
