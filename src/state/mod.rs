pub mod credentials;
pub mod navigator;

pub use credentials::{CredentialStore, PasswordPrompt, PromptRequest, ResolverSettings};
pub use navigator::{ArchiveRecord, Navigator, NavigatorSettings, Outcome};
