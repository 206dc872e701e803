use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, instrument};

use tandem_core::models::{Connection, User};
use tandem_core::{ChatError, UserId};
use tandem_store::ChatStore;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static username pattern"));

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 20;

pub fn validate_username(username: &str) -> Result<(), ChatError> {
    if username.is_empty() {
        return Err(ChatError::InvalidUsername("username is required".into()));
    }
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ChatError::InvalidUsername(format!(
            "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )));
    }
    if !USERNAME_RE.is_match(username) {
        return Err(ChatError::InvalidUsername(
            "username can only contain letters, numbers, and underscores".into(),
        ));
    }
    Ok(())
}

/// Username ⇄ id resolution, registration and login.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn ChatStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub fn register(&self, username: &str) -> Result<User, ChatError> {
        validate_username(username)?;
        let user = self.store.create_user(username)?;
        info!(user_id = %user.id, username, "user registered");
        Ok(user)
    }

    /// Look up a user and the pairing they are currently in.
    #[instrument(skip(self))]
    pub fn login(&self, username: &str) -> Result<(User, Option<Connection>), ChatError> {
        if username.is_empty() {
            return Err(ChatError::InvalidUsername("username is required".into()));
        }
        let user = self
            .store
            .user_by_username(username)?
            .ok_or_else(|| ChatError::NotFound(format!("user {username}")))?;
        let connection = self.store.active_connection_for(user.id)?;
        Ok((user, connection))
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>, ChatError> {
        Ok(self.store.user_by_username(username)?)
    }

    pub fn get(&self, user_id: UserId) -> Result<User, ChatError> {
        self.store
            .user(user_id)?
            .ok_or_else(|| ChatError::NotFound(format!("user {user_id}")))
    }

    /// Resolve `user_id` and check it carries exactly `username`.
    pub fn verify_identity(&self, user_id: UserId, username: &str) -> Result<User, ChatError> {
        match self.store.user(user_id)? {
            Some(user) if user.username == username => Ok(user),
            _ => Err(ChatError::Unauthorized("invalid user credentials".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_store::SqliteStore;

    fn directory() -> UserDirectory {
        UserDirectory::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("bob").is_ok());
        assert!(validate_username("a_b_C_123").is_ok());
        assert!(validate_username("x".repeat(20).as_str()).is_ok());
        for bad in ["", "ab", "has space", "dash-ed", "émile", &"x".repeat(21)] {
            let err = validate_username(bad).unwrap_err();
            assert_eq!(err.code(), "INVALID_USERNAME", "accepted {bad:?}");
        }
    }

    #[test]
    fn register_and_login() {
        let dir = directory();
        let alice = dir.register("alice").unwrap();
        let (user, conn) = dir.login("alice").unwrap();
        assert_eq!(user.id, alice.id);
        assert!(conn.is_none());
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let dir = directory();
        dir.register("alice").unwrap();
        assert_eq!(
            dir.register("alice").unwrap_err(),
            ChatError::UsernameTaken("alice".into())
        );
    }

    #[test]
    fn unknown_login_is_not_found() {
        let dir = directory();
        assert!(matches!(dir.login("ghost"), Err(ChatError::NotFound(_))));
        assert!(matches!(dir.login(""), Err(ChatError::InvalidUsername(_))));
    }

    #[test]
    fn lookups() {
        let dir = directory();
        let bob = dir.register("bob").unwrap();
        assert_eq!(dir.find_by_username("bob").unwrap().map(|u| u.id), Some(bob.id));
        assert!(dir.find_by_username("nobody").unwrap().is_none());
        assert_eq!(dir.get(bob.id).unwrap().username, "bob");
        assert!(matches!(dir.get(UserId::from_raw(9)), Err(ChatError::NotFound(_))));
    }

    #[test]
    fn identity_must_match() {
        let dir = directory();
        let bob = dir.register("bob").unwrap();
        assert!(dir.verify_identity(bob.id, "bob").is_ok());
        assert!(matches!(
            dir.verify_identity(bob.id, "alice"),
            Err(ChatError::Unauthorized(_))
        ));
        assert!(matches!(
            dir.verify_identity(UserId::from_raw(50), "bob"),
            Err(ChatError::Unauthorized(_))
        ));
    }
}
