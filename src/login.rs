#[cfg(feature = "web")]
use crate::app::{AppState, render_auth_page};
use crate::store::{StoreError, UserRecord, UserStore};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
#[cfg(feature = "web")]
use std::sync::Arc;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

/// How new passwords are turned into stored hashes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PasswordScheme {
    /// Argon2id with a random per-record salt
    #[default]
    Argon2,

    /// Unsalted SHA-256 hex digest, kept for parity with existing user data
    LegacySha256,
}

/// Credential data for login and signup
///
/// Used to receive the auth form from the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    /// Username for login/signup
    #[serde(default)]
    pub username: String,

    /// Password in plaintext (only transmitted, never stored)
    #[serde(default)]
    pub password: String,
}

/// Errors surfaced to the user by signup and login
///
/// The display strings are the messages shown inline on the auth page.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username already exists!")]
    UsernameTaken,

    #[error("Invalid username or password.")]
    InvalidCredentials,

    #[error("An error occurred: {0}")]
    Store(#[from] StoreError),

    #[error("An error occurred: {0}")]
    Hash(String),
}

/// Successful outcomes of an auth action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthNotice {
    SignedUp,
    Welcome(String),
}

impl std::fmt::Display for AuthNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthNotice::SignedUp => write!(f, "Signup successful! Please log in."),
            AuthNotice::Welcome(username) => write!(f, "Welcome {}!", username),
        }
    }
}

/// Per-visitor authentication state
///
/// Held only in process memory; lost on logout or restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Whether the visitor has logged in
    pub logged_in: bool,

    /// Username recorded at login
    pub username: String,
}

impl Session {
    /// Message shown right after a successful login
    pub fn welcome(&self) -> AuthNotice {
        AuthNotice::Welcome(self.username.clone())
    }
}

/// Compute the unsalted SHA-256 digest of a password
///
/// # Arguments
/// * `password` - The plaintext password
///
/// # Returns
/// * `String` - 64 lowercase hex characters
pub fn sha256_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash a password for storage
///
/// # Arguments
/// * `password` - The plaintext password to hash
/// * `scheme` - Which hashing scheme to use
///
/// # Returns
/// * `Result<String, AuthError>` - The stored form of the password
///
/// # Errors
/// * Returns an error if Argon2 hashing fails
pub fn hash_password(password: &str, scheme: PasswordScheme) -> Result<String, AuthError> {
    match scheme {
        PasswordScheme::LegacySha256 => Ok(sha256_digest(password)),
        PasswordScheme::Argon2 => {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| AuthError::Hash(e.to_string()))
        }
    }
}

/// Verify a password against a stored hash
///
/// The scheme is detected from the stored value: PHC strings go through
/// Argon2, 64-char hex strings are compared against the SHA-256 digest.
///
/// # Errors
/// * Returns an error if the stored hash is in neither format
pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    if stored.starts_with('$') {
        let parsed_hash = PasswordHash::new(stored)
            .map_err(|_| AuthError::Hash("Invalid password hash format".to_string()))?;

        return Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok());
    }

    if stored.len() == 64 && stored.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(sha256_digest(password) == stored.to_ascii_lowercase());
    }

    Err(AuthError::Hash("Invalid password hash format".to_string()))
}

/// Register a new user
///
/// Stores `{username, hash(password)}` unless the username is taken. No
/// length or charset rules are applied to either field.
///
/// # Errors
/// * `AuthError::UsernameTaken` if the username already exists; nothing is written
/// * `AuthError::Store` if the collection cannot be read or written
pub fn signup(
    store: &dyn UserStore,
    scheme: PasswordScheme,
    username: &str,
    password: &str,
) -> Result<AuthNotice, AuthError> {
    if store.find_by_username(username)?.is_some() {
        return Err(AuthError::UsernameTaken);
    }

    let record = UserRecord {
        username: username.to_string(),
        password: hash_password(password, scheme)?,
    };

    match store.insert_new(record) {
        Ok(()) => {
            log::info!("registered user {username}");
            Ok(AuthNotice::SignedUp)
        }
        // Someone else took the name between our lookup and the insert
        Err(StoreError::Duplicate(_)) => Err(AuthError::UsernameTaken),
        Err(e) => Err(e.into()),
    }
}

/// Check credentials and open a session
///
/// A missing user and a wrong password produce the same error.
///
/// # Errors
/// * `AuthError::InvalidCredentials` if the credentials do not match
/// * `AuthError::Store` if the collection cannot be read
pub fn login(store: &dyn UserStore, username: &str, password: &str) -> Result<Session, AuthError> {
    let Some(user) = store.find_by_username(username)? else {
        log::debug!("login for unknown user");
        return Err(AuthError::InvalidCredentials);
    };

    if verify_password(password, &user.password)? {
        log::info!("user {username} logged in");
        Ok(Session {
            logged_in: true,
            username: username.to_string(),
        })
    } else {
        log::debug!("wrong password for {username}");
        Err(AuthError::InvalidCredentials)
    }
}

/// In-memory map from session id to session state
///
/// Sessions never expire: every login adds an entry and only `logout`
/// removes one, so repeated logins without logging out keep growing the map
/// until the process exits.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a session and return its freshly generated id
    pub fn create(&self, session: Session) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session_id.clone(), session);
        session_id
    }

    /// Look up a logged-in session
    pub fn validate(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(session_id).filter(|s| s.logged_in).cloned()
    }

    /// Drop a session, resetting the visitor to logged out
    pub fn logout(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session_id)
    }
}

// Web handler functions below (only compiled with "web" feature)

/// Resolve the session attached to a request, if any
#[cfg(feature = "web")]
pub fn current_session(state: &AppState, jar: &CookieJar) -> Option<Session> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.validate(cookie.value()))
}

/// Serve the login / signup page
#[cfg(feature = "web")]
pub async fn serve_login_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if current_session(&state, &jar).is_some() {
        return Redirect::to("/dashboard").into_response();
    }
    render_auth_page(&state, StatusCode::OK, None)
}

/// Handle login form submissions
///
/// On success a session cookie is set and the visitor lands on the
/// dashboard; otherwise the auth page is shown again with the error.
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<UserCredentials>,
) -> Response {
    let users = Arc::clone(&state.users);
    let outcome = tokio::task::spawn_blocking(move || {
        login(users.as_ref(), &credentials.username, &credentials.password)
    })
    .await;

    match outcome {
        Ok(Ok(session)) => {
            log::debug!("{}", session.welcome());
            let session_id = state.sessions.create(session);
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true);
            (jar.add(cookie), Redirect::to("/dashboard")).into_response()
        }
        Ok(Err(AuthError::InvalidCredentials)) => render_auth_page(
            &state,
            StatusCode::UNAUTHORIZED,
            Some(Err(AuthError::InvalidCredentials.to_string())),
        ),
        Ok(Err(e)) => {
            log::warn!("login failed: {e}");
            render_auth_page(&state, StatusCode::INTERNAL_SERVER_ERROR, Some(Err(e.to_string())))
        }
        Err(e) => {
            log::error!("login task panicked: {e}");
            render_auth_page(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(Err("An error occurred: login task failed".to_string())),
            )
        }
    }
}

/// Handle signup form submissions
#[cfg(feature = "web")]
pub async fn handle_signup(
    State(state): State<Arc<AppState>>,
    Form(credentials): Form<UserCredentials>,
) -> Response {
    let users = Arc::clone(&state.users);
    let scheme = state.scheme;
    let outcome = tokio::task::spawn_blocking(move || {
        signup(
            users.as_ref(),
            scheme,
            &credentials.username,
            &credentials.password,
        )
    })
    .await;

    match outcome {
        Ok(Ok(notice)) => render_auth_page(&state, StatusCode::OK, Some(Ok(notice.to_string()))),
        Ok(Err(AuthError::UsernameTaken)) => render_auth_page(
            &state,
            StatusCode::CONFLICT,
            Some(Err(AuthError::UsernameTaken.to_string())),
        ),
        Ok(Err(e)) => {
            log::warn!("signup failed: {e}");
            render_auth_page(&state, StatusCode::INTERNAL_SERVER_ERROR, Some(Err(e.to_string())))
        }
        Err(e) => {
            log::error!("signup task panicked: {e}");
            render_auth_page(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(Err("An error occurred: signup task failed".to_string())),
            )
        }
    }
}

/// Handle user logout
///
/// Forgets the session and clears the cookie.
#[cfg(feature = "web")]
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.logout(cookie.value()) {
            log::info!("user {} logged out", session.username);
        }
    }

    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));
    (jar, Redirect::to("/login"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUserStore;

    #[test]
    fn digest_is_deterministic_and_distinguishes_passwords() {
        assert_eq!(sha256_digest("hunter2"), sha256_digest("hunter2"));
        assert_ne!(sha256_digest("hunter2"), sha256_digest("hunter3"));
        assert_eq!(sha256_digest("hunter2").len(), 64);
        // Well-known digest of "abc"
        assert_eq!(
            sha256_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn argon2_hashes_are_salted_but_verify() {
        let first = hash_password("secret", PasswordScheme::Argon2).unwrap();
        let second = hash_password("secret", PasswordScheme::Argon2).unwrap();

        assert_ne!(first, second);
        assert!(verify_password("secret", &first).unwrap());
        assert!(verify_password("secret", &second).unwrap());
        assert!(!verify_password("Secret", &first).unwrap());
    }

    #[test]
    fn legacy_digest_verifies() {
        let stored = hash_password("secret", PasswordScheme::LegacySha256).unwrap();
        assert!(verify_password("secret", &stored).unwrap());
        assert!(!verify_password("other", &stored).unwrap());
    }

    #[test]
    fn unknown_hash_format_is_an_error() {
        assert!(matches!(
            verify_password("secret", "plaintext"),
            Err(AuthError::Hash(_))
        ));
    }

    #[test]
    fn signup_then_login_succeeds() {
        let store = MemoryUserStore::new();

        let notice = signup(&store, PasswordScheme::Argon2, "karthik", "pw").unwrap();
        assert_eq!(notice.to_string(), "Signup successful! Please log in.");

        let session = login(&store, "karthik", "pw").unwrap();
        assert!(session.logged_in);
        assert_eq!(session.username, "karthik");
        assert_eq!(session.welcome().to_string(), "Welcome karthik!");
    }

    #[test]
    fn wrong_password_and_unknown_user_look_the_same() {
        let store = MemoryUserStore::new();
        signup(&store, PasswordScheme::LegacySha256, "karthik", "pw").unwrap();

        let wrong = login(&store, "karthik", "nope").unwrap_err();
        let missing = login(&store, "nobody", "pw").unwrap_err();

        assert_eq!(wrong.to_string(), "Invalid username or password.");
        assert_eq!(wrong.to_string(), missing.to_string());
    }

    #[test]
    fn duplicate_signup_keeps_the_original_record() {
        let store = MemoryUserStore::new();
        signup(&store, PasswordScheme::LegacySha256, "karthik", "first").unwrap();
        let before = store.find_by_username("karthik").unwrap();

        let err = signup(&store, PasswordScheme::LegacySha256, "karthik", "second").unwrap_err();

        assert_eq!(err.to_string(), "Username already exists!");
        assert_eq!(store.find_by_username("karthik").unwrap(), before);
        assert!(login(&store, "karthik", "first").is_ok());
        assert!(login(&store, "karthik", "second").is_err());
    }

    #[test]
    fn empty_credentials_are_accepted() {
        let store = MemoryUserStore::new();
        signup(&store, PasswordScheme::Argon2, "", "").unwrap();
        assert!(login(&store, "", "").is_ok());
    }

    #[test]
    fn session_store_round_trip() {
        let sessions = SessionStore::new();
        let id = sessions.create(Session {
            logged_in: true,
            username: "karthik".to_string(),
        });

        assert_eq!(sessions.validate(&id).unwrap().username, "karthik");
        assert!(sessions.validate("unknown").is_none());

        sessions.logout(&id);
        assert!(sessions.validate(&id).is_none());
    }

    #[test]
    fn sessions_stay_until_logout() {
        let sessions = SessionStore::new();
        let session = Session {
            logged_in: true,
            username: "karthik".to_string(),
        };
        let first = sessions.create(session.clone());
        let second = sessions.create(session);

        assert_ne!(first, second);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.validate(&first).is_some());

        sessions.logout(&first);
        sessions.logout(&second);
        assert!(sessions.is_empty());
    }
}
