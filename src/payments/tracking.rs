//! Purchase Tracking
//!
//! Emits one purchase conversion per accepted transaction for each
//! configured ad pixel. Constructed once at startup and handed to whoever
//! completes purchases; there is no global tracker.
//!
//! The "already recorded" guard only remembers the most recent transaction
//! IDs. The history table is what stops a receipt from being granted twice,
//! so an evicted ID can never come back through an accepted purchase.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

/// Transaction IDs remembered by the duplicate guard
pub const DEFAULT_REMEMBERED: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEvent {
    pub pixel: &'static str,
    pub pixel_id: String,
    pub transaction_id: String,
    pub value: i64,
    pub currency: String,
}

/// Ad pixel IDs, editable by admins at runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelSettings {
    #[serde(default)]
    pub facebook_pixel_id: Option<String>,
    #[serde(default)]
    pub tiktok_pixel_id: Option<String>,
}

impl PixelSettings {
    /// Blank IDs mean "not configured"
    fn normalized(self) -> Self {
        let clean = |id: Option<String>| {
            id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        Self {
            facebook_pixel_id: clean(self.facebook_pixel_id),
            tiktok_pixel_id: clean(self.tiktok_pixel_id),
        }
    }
}

#[derive(Default)]
struct RecentIds {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

pub struct PurchaseTracker {
    pixels: RwLock<PixelSettings>,
    recorded: Mutex<RecentIds>,
    capacity: usize,
}

impl PurchaseTracker {
    pub fn new(facebook_pixel_id: Option<String>, tiktok_pixel_id: Option<String>) -> Self {
        Self {
            pixels: RwLock::new(
                PixelSettings {
                    facebook_pixel_id,
                    tiktok_pixel_id,
                }
                .normalized(),
            ),
            recorded: Mutex::new(RecentIds::default()),
            capacity: DEFAULT_REMEMBERED,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn settings(&self) -> PixelSettings {
        self.pixels.read().clone()
    }

    pub fn update_settings(&self, settings: PixelSettings) -> PixelSettings {
        let settings = settings.normalized();
        info!(
            facebook = settings.facebook_pixel_id.is_some(),
            tiktok = settings.tiktok_pixel_id.is_some(),
            "📈 Tracking pixels updated"
        );
        *self.pixels.write() = settings.clone();
        settings
    }

    /// Emit purchase events for every configured pixel. Returns `None` when
    /// this transaction was already recorded.
    pub fn record_purchase(
        &self,
        transaction_id: &str,
        value: i64,
        currency: &str,
    ) -> Option<Vec<PurchaseEvent>> {
        {
            let mut recent = self.recorded.lock();
            if !recent.seen.insert(transaction_id.to_string()) {
                debug!(transaction_id, "purchase already tracked, skipping");
                return None;
            }
            recent.order.push_back(transaction_id.to_string());
            while recent.order.len() > self.capacity {
                if let Some(oldest) = recent.order.pop_front() {
                    recent.seen.remove(&oldest);
                }
            }
        }

        let pixels = self.settings();
        let configured = [
            ("facebook", pixels.facebook_pixel_id),
            ("tiktok", pixels.tiktok_pixel_id),
        ];

        let mut events = Vec::new();
        for (pixel, id) in configured {
            let Some(pixel_id) = id else { continue };
            info!(pixel, pixel_id = %pixel_id, transaction_id, value, currency, "📈 Purchase tracked");
            events.push(PurchaseEvent {
                pixel,
                pixel_id,
                transaction_id: transaction_id.to_string(),
                value,
                currency: currency.to_string(),
            });
        }
        Some(events)
    }

    pub fn is_recorded(&self, transaction_id: &str) -> bool {
        self.recorded.lock().seen.contains(transaction_id)
    }

    pub fn remembered(&self) -> usize {
        self.recorded.lock().order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_record_is_noop() {
        let tracker = PurchaseTracker::new(Some("fb-1".to_string()), Some("tt-1".to_string()));
        let events = tracker.record_purchase("ABC123", 699, "PKR").unwrap();
        assert!(tracker.record_purchase("ABC123", 699, "PKR").is_none());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].pixel, "facebook");
        assert_eq!(events[1].pixel_id, "tt-1");
    }

    #[test]
    fn test_unconfigured_pixels_emit_nothing() {
        let tracker = PurchaseTracker::disabled();
        assert_eq!(tracker.record_purchase("ABC123", 699, "PKR"), Some(vec![]));
        assert!(tracker.is_recorded("ABC123"));
    }

    #[test]
    fn test_guard_forgets_oldest_ids_past_capacity() {
        let tracker = PurchaseTracker::disabled().with_capacity(2);
        for id in ["TX1", "TX2", "TX3"] {
            assert!(tracker.record_purchase(id, 299, "PKR").is_some());
        }

        assert_eq!(tracker.remembered(), 2);
        assert!(!tracker.is_recorded("TX1"));
        assert!(tracker.is_recorded("TX2"));
        assert!(tracker.is_recorded("TX3"));
    }

    #[test]
    fn test_settings_update_applies_to_next_purchase() {
        let tracker = PurchaseTracker::disabled();
        let stored = tracker.update_settings(PixelSettings {
            facebook_pixel_id: Some(" fb-9 ".to_string()),
            tiktok_pixel_id: Some("   ".to_string()),
        });
        assert_eq!(stored.facebook_pixel_id.as_deref(), Some("fb-9"));
        assert_eq!(stored.tiktok_pixel_id, None);

        let events = tracker.record_purchase("TX7", 1499, "PKR").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pixel_id, "fb-9");
    }
}
