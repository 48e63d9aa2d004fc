// Defaults for the optional settings, overridable from the environment (or .env).

use std::env;

lazy_static::lazy_static! {
    pub static ref GEMINI_MODEL: String = env::var("MINDLINE_MODEL").unwrap_or_else(|_| "gemini-1.5-flash-latest".to_string());
    pub static ref GEMINI_API_BASE: String = env::var("MINDLINE_API_BASE").unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
    pub static ref TEMPLATES_DIR: String = env::var("MINDLINE_TEMPLATES_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref BACKGROUND_PATH: String = env::var("MINDLINE_BACKGROUND").unwrap_or_else(|_| "background.png".to_string());
}

pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";
pub const TIMEOUT_VAR: &str = "MINDLINE_TIMEOUT_SECS";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const SESSION_TTL_VAR: &str = "MINDLINE_SESSION_TTL_SECS";
/// Web sessions idle longer than this are dropped.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

pub const PAGE_TITLE: &str = "AI Mental Health Support";
