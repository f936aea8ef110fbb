//! Profile store (C7): a thread-safe, listener-notifying repository of
//! completed scans.
//!
//! No teacher module owns a shared, mutation-notifying repository like
//! this one — liclac-cardinal writes straight to stdout/a file adapter
//! (`adapters/file.rs`) — so this is grounded on the same `Arc<Mutex<_>>`
//! snapshot-read shape the teacher uses for its card transport handle,
//! generalised into a CRUD store with the [`crate::events::EventBus`]
//! listener-isolation pattern reused for notification.

use std::sync::{Arc, Mutex};

use crate::session::{CardProfile, SessionRecord};

#[derive(Default)]
struct StoreState {
    next_id: u64,
    profiles: Vec<CardProfile>,
}

pub trait StoreListener: Send + Sync {
    fn on_change(&self);
}

#[derive(Clone)]
pub struct ProfileStore {
    state: Arc<Mutex<StoreState>>,
    listeners: Arc<Mutex<Vec<Arc<dyn StoreListener>>>>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn unsubscribe(&self, target: &Arc<dyn StoreListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, target));
    }

    fn notify(&self) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener.on_change();
        }
    }

    pub fn add(&self, session_record: SessionRecord, created_at: chrono::DateTime<chrono::Local>) -> u64 {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            state.profiles.push(CardProfile {
                id,
                created_at,
                session_record,
                label_overrides: Default::default(),
            });
            id
        };
        self.notify();
        id
    }

    pub fn update(&self, profile: CardProfile) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(slot) = state.profiles.iter_mut().find(|p| p.id == profile.id) {
                *slot = profile;
            }
        }
        self.notify();
    }

    pub fn delete(&self, id: u64) {
        {
            let mut state = self.state.lock().unwrap();
            state.profiles.retain(|p| p.id != id);
        }
        self.notify();
    }

    pub fn get(&self, id: u64) -> Option<CardProfile> {
        self.state.lock().unwrap().profiles.iter().find(|p| p.id == id).cloned()
    }

    pub fn list_all(&self) -> Vec<CardProfile> {
        let mut profiles = self.state.lock().unwrap().profiles.clone();
        sort_profiles(&mut profiles);
        profiles
    }

    pub fn list_recent(&self, limit: usize) -> Vec<CardProfile> {
        let mut profiles = self.state.lock().unwrap().profiles.clone();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        profiles.truncate(limit);
        profiles
    }

    pub fn search(&self, query: &str) -> Vec<CardProfile> {
        let query = query.to_lowercase();
        let mut profiles: Vec<CardProfile> = self
            .state
            .lock()
            .unwrap()
            .profiles
            .iter()
            .filter(|p| {
                let derived = &p.session_record.derived;
                [
                    derived.pan.as_deref(),
                    derived.cardholder_name.as_deref(),
                    derived.application_label.as_deref(),
                ]
                .iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&query))
            })
            .cloned()
            .collect();
        sort_profiles(&mut profiles);
        profiles
    }

    pub fn clear_all(&self) {
        {
            self.state.lock().unwrap().profiles.clear();
        }
        self.notify();
    }

    pub fn export_to_text(&self) -> String {
        self.list_all()
            .iter()
            .map(|p| format!("# Profile {}\n{}", p.id, p.session_record.to_text_summary()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// PAN-bearing profiles first (sorted by PAN ascending), then the rest by
/// card UID.
fn sort_profiles(profiles: &mut [CardProfile]) {
    profiles.sort_by(|a, b| {
        let a_pan = a.session_record.derived.pan.as_deref();
        let b_pan = b.session_record.derived.pan.as_deref();
        match (a_pan, b_pan) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.session_record.card_uid.cmp(&b.session_record.card_uid),
        }
    });
}
