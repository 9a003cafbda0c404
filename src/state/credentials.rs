//! Password caching and resolution
//!
//! Resolution walks `TryCache → TrySessionPool → Prompt` and ends either
//! `Resolved` or `Abandoned`. A password is only ever cached after the guarded
//! operation succeeded with exactly that password set on the backend, and an
//! abandoned run puts the backend's previous password back.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::providers::ArchiveBackend;

/// Passwords known to this browsing session
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    /// Archive identity -> password verified against it
    per_archive: HashMap<String, String>,
    /// Passwords that worked anywhere this session, oldest first
    session_pool: Vec<String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, identity: &str) -> Option<&str> {
        self.per_archive.get(identity).map(String::as_str)
    }

    pub fn is_cached(&self, identity: &str) -> bool {
        self.per_archive.contains_key(identity)
    }

    /// Record a password verified against `identity`
    pub fn remember(&mut self, identity: &str, password: &str) {
        self.per_archive.insert(identity.to_string(), password.to_string());
    }

    /// Append to the session pool unless already present.
    /// Returns true if the pool grew.
    pub fn add_to_pool(&mut self, password: &str) -> bool {
        if self.session_pool.iter().any(|p| p == password) {
            return false;
        }
        self.session_pool.push(password.to_string());
        true
    }

    pub fn pool(&self) -> &[String] {
        &self.session_pool
    }
}

/// Why a password is being asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPurpose {
    /// Listing the archive itself
    OpenArchive,
    /// Pulling one entry out of the archive
    ExtractEntry(String),
}

/// What the prompt should show the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// Display name of the archive the password is for
    pub archive: String,
    pub purpose: PromptPurpose,
}

impl PromptRequest {
    pub fn open(archive: impl Into<String>) -> Self {
        Self { archive: archive.into(), purpose: PromptPurpose::OpenArchive }
    }

    pub fn extract(archive: impl Into<String>, entry: impl Into<String>) -> Self {
        Self { archive: archive.into(), purpose: PromptPurpose::ExtractEntry(entry.into()) }
    }

    pub fn message(&self) -> String {
        match &self.purpose {
            PromptPurpose::OpenArchive => format!("Enter password for {}", self.archive),
            PromptPurpose::ExtractEntry(entry) => {
                format!("Enter password to extract {} from {}", entry, self.archive)
            }
        }
    }
}

/// Interactive password source
pub trait PasswordPrompt {
    /// `None` means the user cancelled. `Some("")` is a real attempt with an
    /// empty password.
    fn request_password(&mut self, request: &PromptRequest) -> Option<String>;
}

/// Stage that produced a working password
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    /// Worked without any password
    Unlocked,
    Cache,
    SessionPool,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The prompt was dismissed
    Cancelled,
    /// The prompted password did not work either
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved { value: T, by: ResolvedBy },
    Abandoned(AbandonReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverSettings {
    /// Attempt the operation with an empty password before the cache
    pub try_without_password: bool,
}

/// One resolution run over a store and a prompt
pub struct CredentialResolver<'a> {
    store: &'a mut CredentialStore,
    prompt: &'a mut dyn PasswordPrompt,
    settings: ResolverSettings,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(
        store: &'a mut CredentialStore,
        prompt: &'a mut dyn PasswordPrompt,
        settings: ResolverSettings,
    ) -> Self {
        Self { store, prompt, settings }
    }

    /// Run the guarded operation until a password makes it succeed.
    ///
    /// `op` returns `Some` on success. The prompt is asked at most once; a
    /// failed prompted attempt ends the run as `Rejected`. Either way an
    /// abandoned run leaves the backend with the password it started with.
    pub fn resolve<T, F>(
        &mut self,
        backend: &mut dyn ArchiveBackend,
        identity: &str,
        request: &PromptRequest,
        mut op: F,
    ) -> Resolution<T>
    where
        F: FnMut(&mut dyn ArchiveBackend) -> Option<T>,
    {
        let previous = backend.password().to_string();

        if self.settings.try_without_password {
            backend.set_password("");
            if let Some(value) = op(backend) {
                debug!("{}: no password needed", identity);
                return Resolution::Resolved { value, by: ResolvedBy::Unlocked };
            }
        }

        // TryCache
        if let Some(cached) = self.store.cached(identity).map(str::to_string) {
            backend.set_password(&cached);
            if let Some(value) = op(backend) {
                debug!("{}: cached password accepted", identity);
                return Resolution::Resolved { value, by: ResolvedBy::Cache };
            }
            debug!("{}: cached password no longer works", identity);
        }

        // TrySessionPool
        let pool = self.store.pool().to_vec();
        for (i, candidate) in pool.iter().enumerate() {
            backend.set_password(candidate);
            if let Some(value) = op(backend) {
                debug!("{}: session password #{} accepted", identity, i + 1);
                self.store.remember(identity, candidate);
                return Resolution::Resolved { value, by: ResolvedBy::SessionPool };
            }
        }

        // Prompt
        let Some(password) = self.prompt.request_password(request) else {
            info!("{}: password prompt cancelled", identity);
            backend.set_password(&previous);
            return Resolution::Abandoned(AbandonReason::Cancelled);
        };
        backend.set_password(&password);
        match op(backend) {
            Some(value) => {
                self.store.remember(identity, &password);
                if !password.is_empty() {
                    self.store.add_to_pool(&password);
                }
                info!("{}: prompted password accepted", identity);
                Resolution::Resolved { value, by: ResolvedBy::Prompt }
            }
            None => {
                warn!("{}: password did not work", identity);
                backend.set_password(&previous);
                Resolution::Abandoned(AbandonReason::Rejected)
            }
        }
    }
}

/// Listing as a guarded operation: success means a non-empty entry list
pub fn listing(backend: &mut dyn ArchiveBackend) -> Option<Vec<String>> {
    let entries = backend.list_entries(None);
    if entries.is_empty() { None } else { Some(entries) }
}

/// Prompt answering from a fixed script; `None` entries cancel
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedPrompt {
    answers: std::collections::VecDeque<Option<String>>,
    pub asked: Vec<PromptRequest>,
}

#[cfg(test)]
impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(|a| a.map(Into::into)).collect(),
            asked: Vec::new(),
        }
    }
}

#[cfg(test)]
impl PasswordPrompt for ScriptedPrompt {
    fn request_password(&mut self, request: &PromptRequest) -> Option<String> {
        self.asked.push(request.clone());
        self.answers.pop_front().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::{Call, MemArchive, MemoryBackend, SharedStore};

    fn open(store: &SharedStore, path: &str) -> MemoryBackend {
        let mut backend = MemoryBackend::new(store.clone());
        backend.open(std::path::Path::new(path)).unwrap();
        backend
    }

    fn listed_passwords(store: &SharedStore) -> Vec<String> {
        store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::List { password, .. } => Some(password),
                _ => None,
            })
            .collect()
    }

    fn resolve_listing(
        creds: &mut CredentialStore,
        prompt: &mut ScriptedPrompt,
        backend: &mut MemoryBackend,
        identity: &str,
    ) -> Resolution<Vec<String>> {
        CredentialResolver::new(creds, prompt, ResolverSettings::default()).resolve(
            backend,
            identity,
            &PromptRequest::open(identity),
            listing,
        )
    }

    #[test]
    fn test_store_pool_dedup_keeps_order() {
        let mut store = CredentialStore::new();
        assert!(store.add_to_pool("a"));
        assert!(store.add_to_pool("b"));
        assert!(!store.add_to_pool("a"));
        assert_eq!(store.pool(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_prompt_success_caches_and_pools() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/a.vfsarc", MemArchive::new().password("secret").file("x.txt", b"x"));
        let mut backend = open(&store, "/a.vfsarc");
        let mut creds = CredentialStore::new();
        let mut prompt = ScriptedPrompt::new([Some("secret")]);

        let result = resolve_listing(&mut creds, &mut prompt, &mut backend, "/a.vfsarc");
        assert_eq!(
            result,
            Resolution::Resolved { value: vec!["x.txt".to_string()], by: ResolvedBy::Prompt }
        );
        assert_eq!(prompt.asked.len(), 1);
        assert_eq!(creds.cached("/a.vfsarc"), Some("secret"));
        assert_eq!(creds.pool(), &["secret".to_string()]);
    }

    #[test]
    fn test_pool_tried_in_order_before_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/b.vfsarc", MemArchive::new().password("two").file("x.txt", b"x"));
        let mut backend = open(&store, "/b.vfsarc");
        let mut creds = CredentialStore::new();
        creds.add_to_pool("one");
        creds.add_to_pool("two");
        creds.add_to_pool("three");
        let mut prompt = ScriptedPrompt::new(Vec::<Option<String>>::new());

        let result = resolve_listing(&mut creds, &mut prompt, &mut backend, "/b.vfsarc");
        assert!(matches!(result, Resolution::Resolved { by: ResolvedBy::SessionPool, .. }));
        assert!(prompt.asked.is_empty());
        assert_eq!(listed_passwords(&store), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(creds.cached("/b.vfsarc"), Some("two"));
        // failed candidates stay available for other archives
        assert_eq!(creds.pool().len(), 3);
    }

    #[test]
    fn test_cache_hit_skips_pool_and_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/c.vfsarc", MemArchive::new().password("pw").file("x.txt", b"x"));
        let mut backend = open(&store, "/c.vfsarc");
        let mut creds = CredentialStore::new();
        creds.remember("/c.vfsarc", "pw");
        creds.add_to_pool("other");
        let mut prompt = ScriptedPrompt::new(Vec::<Option<String>>::new());

        let result = resolve_listing(&mut creds, &mut prompt, &mut backend, "/c.vfsarc");
        assert!(matches!(result, Resolution::Resolved { by: ResolvedBy::Cache, .. }));
        assert_eq!(listed_passwords(&store), vec!["pw".to_string()]);
    }

    #[test]
    fn test_cancel_abandons_without_caching() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/d.vfsarc", MemArchive::new().password("pw").file("x.txt", b"x"));
        let mut backend = open(&store, "/d.vfsarc");
        let mut creds = CredentialStore::new();
        let mut prompt = ScriptedPrompt::new([None::<String>]);

        let result = resolve_listing(&mut creds, &mut prompt, &mut backend, "/d.vfsarc");
        assert_eq!(result, Resolution::Abandoned(AbandonReason::Cancelled));
        assert!(!creds.is_cached("/d.vfsarc"));
    }

    #[test]
    fn test_wrong_prompt_rejected_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/e.vfsarc", MemArchive::new().password("pw").file("x.txt", b"x"));
        let mut backend = open(&store, "/e.vfsarc");
        let mut creds = CredentialStore::new();
        creds.add_to_pool("stale");
        let mut prompt = ScriptedPrompt::new([Some("nope"), Some("pw")]);

        let result = resolve_listing(&mut creds, &mut prompt, &mut backend, "/e.vfsarc");
        assert_eq!(result, Resolution::Abandoned(AbandonReason::Rejected));
        assert_eq!(prompt.asked.len(), 1);
        assert!(!creds.is_cached("/e.vfsarc"));
        assert_eq!(creds.pool(), &["stale".to_string()]);
    }

    #[test]
    fn test_empty_prompt_is_an_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/plain.vfsarc", MemArchive::new().file("x.txt", b"x"));
        let mut backend = open(&store, "/plain.vfsarc");
        let mut creds = CredentialStore::new();
        let mut prompt = ScriptedPrompt::new([Some("")]);

        let result = resolve_listing(&mut creds, &mut prompt, &mut backend, "/plain.vfsarc");
        assert!(matches!(result, Resolution::Resolved { by: ResolvedBy::Prompt, .. }));
        assert_eq!(creds.cached("/plain.vfsarc"), Some(""));
        assert!(creds.pool().is_empty());
    }

    #[test]
    fn test_empty_archive_falls_through_to_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/empty.vfsarc", MemArchive::new());
        let mut backend = open(&store, "/empty.vfsarc");
        let mut creds = CredentialStore::new();
        let mut prompt = ScriptedPrompt::new([Some("")]);

        let result = resolve_listing(&mut creds, &mut prompt, &mut backend, "/empty.vfsarc");
        assert_eq!(result, Resolution::Abandoned(AbandonReason::Rejected));
        assert_eq!(prompt.asked.len(), 1);
    }

    #[test]
    fn test_try_without_password() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/plain.vfsarc", MemArchive::new().file("x.txt", b"x"));
        let mut backend = open(&store, "/plain.vfsarc");
        let mut creds = CredentialStore::new();
        let mut prompt = ScriptedPrompt::new(Vec::<Option<String>>::new());

        let settings = ResolverSettings { try_without_password: true };
        let result = CredentialResolver::new(&mut creds, &mut prompt, settings).resolve(
            &mut backend,
            "/plain.vfsarc",
            &PromptRequest::open("plain.vfsarc"),
            listing,
        );
        assert!(matches!(result, Resolution::Resolved { by: ResolvedBy::Unlocked, .. }));
        assert!(!creds.is_cached("/plain.vfsarc"));
    }

    #[test]
    fn test_extraction_guarded_operation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/f.vfsarc", MemArchive::new().password("pw").file("x.txt", b"hello"));
        let mut backend = open(&store, "/f.vfsarc");
        let mut creds = CredentialStore::new();
        creds.add_to_pool("pw");
        let mut prompt = ScriptedPrompt::new(Vec::<Option<String>>::new());

        let result = CredentialResolver::new(&mut creds, &mut prompt, ResolverSettings::default())
            .resolve(&mut backend, "/f.vfsarc", &PromptRequest::extract("f.vfsarc", "x.txt"), |b| {
                b.extract_entry_to_temp("x.txt").ok()
            });
        let Resolution::Resolved { value, by } = result else {
            panic!("extraction should resolve from the pool");
        };
        assert_eq!(by, ResolvedBy::SessionPool);
        assert_eq!(std::fs::read(value).unwrap(), b"hello");
        assert_eq!(creds.cached("/f.vfsarc"), Some("pw"));
    }

    #[test]
    fn test_abandoned_run_restores_previous_password() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        store.insert("/g.vfsarc", MemArchive::new().password("pw").file("x.txt", b"x"));
        let mut backend = open(&store, "/g.vfsarc");
        backend.set_password("pw");
        let mut creds = CredentialStore::new();
        creds.add_to_pool("zzz");

        let mut prompt = ScriptedPrompt::new([None::<String>]);
        let result = CredentialResolver::new(&mut creds, &mut prompt, ResolverSettings::default()).resolve(
            &mut backend,
            "/g.vfsarc",
            &PromptRequest::extract("g.vfsarc", "x.txt"),
            |_| None::<()>,
        );
        assert_eq!(result, Resolution::Abandoned(AbandonReason::Cancelled));
        assert_eq!(backend.password(), "pw");

        let mut prompt = ScriptedPrompt::new([Some("wrong")]);
        let result = CredentialResolver::new(&mut creds, &mut prompt, ResolverSettings::default()).resolve(
            &mut backend,
            "/g.vfsarc",
            &PromptRequest::extract("g.vfsarc", "x.txt"),
            |_| None::<()>,
        );
        assert_eq!(result, Resolution::Abandoned(AbandonReason::Rejected));
        assert_eq!(backend.password(), "pw");
        assert_eq!(backend.list_entries(None), vec!["x.txt".to_string()]);
    }

    #[test]
    fn test_prompt_messages() {
        assert_eq!(PromptRequest::open("a.vfsarc").message(), "Enter password for a.vfsarc");
        assert_eq!(
            PromptRequest::extract("a.vfsarc", "in.vfsarc").message(),
            "Enter password to extract in.vfsarc from a.vfsarc"
        );
    }
}
