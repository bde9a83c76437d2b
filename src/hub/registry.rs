//! Client table and execution subscription index.
//!
//! Both sides of a subscription (the client's own set and the execution's
//! subscriber set) change together in one call. An execution entry exists
//! only while its subscriber set is non-empty.

use std::collections::{HashMap, HashSet};

use crate::hub::client::Client;
use crate::net::ClientId;

#[derive(Default)]
pub struct Registry {
    clients: HashMap<ClientId, Client>,
    executions: HashMap<String, HashSet<ClientId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Client) {
        self.clients.insert(client.id, client);
    }

    pub fn get(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Remove a client and every index entry that referenced it.
    pub fn remove(&mut self, id: &ClientId) -> Option<Client> {
        let client = self.clients.remove(id)?;
        for execution_id in &client.subscriptions {
            self.detach(execution_id, id);
        }
        Some(client)
    }

    /// `None` if the client is unknown, otherwise whether this was a new subscription.
    pub fn subscribe(&mut self, id: &ClientId, execution_id: &str) -> Option<bool> {
        let client = self.clients.get_mut(id)?;
        if !client.subscriptions.insert(execution_id.to_string()) {
            return Some(false);
        }
        self.executions
            .entry(execution_id.to_string())
            .or_default()
            .insert(*id);
        Some(true)
    }

    /// `None` if the client is unknown, otherwise whether a subscription was removed.
    pub fn unsubscribe(&mut self, id: &ClientId, execution_id: &str) -> Option<bool> {
        let client = self.clients.get_mut(id)?;
        if !client.subscriptions.remove(execution_id) {
            return Some(false);
        }
        self.detach(execution_id, id);
        Some(true)
    }

    fn detach(&mut self, execution_id: &str, id: &ClientId) {
        if let Some(subscribers) = self.executions.get_mut(execution_id) {
            subscribers.remove(id);
            if subscribers.is_empty() {
                self.executions.remove(execution_id);
            }
        }
    }

    pub fn subscribers(&self, execution_id: &str) -> impl Iterator<Item = &ClientId> {
        self.executions.get(execution_id).into_iter().flatten()
    }

    pub fn is_subscribed(&self, id: &ClientId, execution_id: &str) -> bool {
        self.executions
            .get(execution_id)
            .is_some_and(|subscribers| subscribers.contains(id))
    }

    pub fn has_execution(&self, execution_id: &str) -> bool {
        self.executions.contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.executions.values().map(HashSet::len).sum()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn clients_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.values_mut()
    }

    pub fn executions(&self) -> impl Iterator<Item = (&String, &HashSet<ClientId>)> {
        self.executions.iter()
    }
}
