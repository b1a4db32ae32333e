//! Connected-wallet context, injected into the views that need it.

use crate::observer::{EventHub, Subscription};
use crate::types::OfferItem;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewerEvent {
    Connected(String),
    Disconnected,
}

/// Shared handle to the currently connected wallet address
#[derive(Clone, Default)]
pub struct ViewerContext {
    address: Arc<RwLock<Option<String>>>,
    events: EventHub<ViewerEvent>,
}

impl ViewerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(address: impl Into<String>) -> Self {
        let ctx = Self::new();
        ctx.set(Some(address.into()));
        ctx
    }

    pub fn address(&self) -> Option<String> {
        self.address
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is(&self, address: &str) -> bool {
        self.address
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
            == Some(address)
    }

    /// Emits only when the address actually changes
    pub fn set(&self, address: Option<String>) {
        let mut guard = self.address.write().unwrap_or_else(|e| e.into_inner());
        if *guard == address {
            return;
        }
        *guard = address.clone();
        drop(guard);
        log::info!(
            "[viewer] wallet {}",
            address.as_deref().unwrap_or("disconnected")
        );
        self.events.emit(match address {
            Some(a) => ViewerEvent::Connected(a),
            None => ViewerEvent::Disconnected,
        });
    }

    pub fn subscribe(&self) -> Subscription<ViewerEvent> {
        self.events.subscribe()
    }
}

/// What the viewer may do with an offer row
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferAction {
    /// Viewer owns the NFT (or is the listed seller)
    Accept,
    /// Viewer placed the offer
    Update,
    None,
}

impl OfferItem {
    pub fn action_for(&self, viewer: &ViewerContext) -> OfferAction {
        let Some(me) = viewer.address() else {
            return OfferAction::None;
        };
        if self.buyer == me {
            return OfferAction::Update;
        }
        let owner = self.nft.as_ref().and_then(|n| n.owner.as_deref());
        if owner == Some(me.as_str()) {
            OfferAction::Accept
        } else {
            OfferAction::None
        }
    }
}
