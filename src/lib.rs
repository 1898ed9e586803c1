pub mod audio;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod nats;
pub mod pool;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use audio::{AudioEncoding, AudioFormat, AudioSource};
pub use config::{Config, TransportKind};
pub use credentials::{Credential, CredentialCache, CredentialProvider, StaticCredential};
pub use dispatcher::{EventDispatcher, SessionSummary};
pub use error::{ConfigError, TransportError, TransportResult};
pub use http::{create_router, AppState};
pub use nats::NatsTransport;
pub use pool::{PoolConfig, RunSummary, WorkerPool};
pub use session::{
    IterationOutcome, IterationReport, Phase, SessionConfig, SessionContext, SessionCoordinator, SessionHandle,
    SessionId, Transition,
};
pub use telemetry::{Counter, FailureLog, FailureRecord, LatencyPhase, TelemetryAggregator, TelemetrySnapshot};
pub use transport::{
    event_channel, ConnectionMode, EventKind, SimulatedTransport, SimulationProfile, StartParams, Transport,
    TransportEvent, TransportHandle,
};
