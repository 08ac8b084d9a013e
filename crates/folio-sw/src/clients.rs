//! Open pages and which worker controls them.

use hashbrown::HashMap;
use url::Url;
use uuid::Uuid;

use crate::worker::ServiceWorkerId;

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently serving this client's requests.
    pub controller: Option<ServiceWorkerId>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients registry.
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

    /// Register a newly opened window. It starts controlled by `controller`,
    /// the worker active at load time.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        let id = format!("client-{}", Uuid::new_v4());
        let client = Client {
            id: id.clone(),
            url,
            client_type: ClientType::Window,
            controller,
        };
        self.clients.insert(id, client.clone());
        client
    }

    /// Remove a client (page closed).
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Match clients, by default only those controlled by `worker`.
    pub fn match_all(&self, worker: ServiceWorkerId, options: &ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Make `worker` the controller of every client on `origin`. Returns the
    /// ids of clients whose controller changed, sorted.
    pub fn claim(&mut self, worker: ServiceWorkerId, origin: &Url) -> Vec<String> {
        let mut changed = Vec::new();
        for client in self.clients.values_mut() {
            if client.url.origin() != origin.origin() || client.controller == Some(worker) {
                continue;
            }
            client.controller = Some(worker);
            changed.push(client.id.clone());
        }
        changed.sort();
        changed
    }
}
