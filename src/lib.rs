pub mod chat;
pub mod config;
pub mod constants;
pub mod generation;
pub mod language;
pub mod session;
pub mod web_server;

pub use config::{Config, ConfigError};
pub use generation::{ErrorKind, GeminiClient, GenerationError, GenerationService};
pub use language::{InvalidSelection, Language};
pub use session::{Message, Role, SendOutcome, SessionController, SessionState, Transcript};
