//! Server-side services captured by the server functions

use super::User;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Services shared by every server function of the app
#[derive(Clone, Default)]
pub struct AppServices {
    pub db: DbService,
    pub sessions: SessionStore,
}

impl AppServices {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    next_id: u32,
}

/// Database service (simulated in-memory store)
#[derive(Clone)]
pub struct DbService {
    tables: Arc<RwLock<Tables>>,
}

impl DbService {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables {
                users: vec![
                    User::new(1, "Alice", "alice@example.com"),
                    User::new(2, "Bob", "bob@example.com"),
                ],
                next_id: 3,
            })),
        }
    }

    pub async fn get_user(&self, id: u32) -> Option<User> {
        self.tables.read().await.users.iter().find(|u| u.id == id).cloned()
    }

    pub async fn list_users(&self) -> Vec<User> {
        self.tables.read().await.users.clone()
    }

    pub async fn create_user(&self, name: &str, email: &str) -> User {
        let mut tables = self.tables.write().await;
        let user = User::new(tables.next_id, name, email);
        tables.next_id += 1;
        tables.users.push(user.clone());
        user
    }

    pub async fn update_user(
        &self,
        id: u32,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Option<User> {
        let mut tables = self.tables.write().await;
        let user = tables.users.iter_mut().find(|u| u.id == id)?;

        if let Some(n) = name {
            user.name = n.to_string();
        }
        if let Some(e) = email {
            user.email = e.to_string();
        }

        Some(user.clone())
    }

    pub async fn delete_user(&self, id: u32) -> bool {
        let mut tables = self.tables.write().await;
        let len = tables.users.len();
        tables.users.retain(|u| u.id != id);
        tables.users.len() < len
    }

    pub async fn count_users(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

impl Default for DbService {
    fn default() -> Self {
        Self::new()
    }
}

/// Bearer tokens issued to signed-in users
#[derive(Clone)]
pub struct SessionStore {
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        let mut tokens = HashMap::new();
        tokens.insert("demo-token".to_string(), "alice".to_string());
        Self {
            tokens: Arc::new(RwLock::new(tokens)),
        }
    }

    /// User owning `token`, if any.
    pub async fn resolve(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }

    pub async fn revoke(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
