//! Clients API: the window clients a worker can open and focus.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

/// A window client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Whether focused.
    pub focused: bool,
}

/// Window clients known to the host.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Every open window.
    pub fn match_all(&self) -> Vec<&Client> {
        self.clients.values().collect()
    }

    /// Open a new window on `url`.
    pub fn open_window(&mut self, url: &Url) -> Client {
        let client = Client {
            id: next_client_id(),
            url: url.clone(),
            focused: true,
        };

        self.unfocus_all();
        self.clients.insert(client.id.clone(), client.clone());
        debug!(client = %client.id, url = %url, "Window opened");
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<Client, ServiceWorkerError> {
        if !self.clients.contains_key(id) {
            return Err(ServiceWorkerError::NotFound(id.to_string()));
        }

        self.unfocus_all();
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;
        client.focused = true;
        Ok(client.clone())
    }

    /// Focus a window already showing `url`, or open one.
    pub fn open_or_focus(&mut self, url: &Url) -> Client {
        let existing = self
            .clients
            .values()
            .find(|c| &c.url == url)
            .map(|c| c.id.clone());

        match existing {
            Some(id) => match self.focus(&id) {
                Ok(client) => client,
                Err(_) => self.open_window(url),
            },
            None => self.open_window(url),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn unfocus_all(&mut self) {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
