//! Connectivity indicator state.
//!
//! The host UI renders a small badge reflecting the collaboration layer's
//! health. This module only computes what the badge should say, localized
//! for the dashboard's two languages; rendering stays with the host.

/// Text direction of the host UI language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDirection {
    /// Left-to-right (English)
    Ltr,
    /// Right-to-left (Arabic)
    Rtl,
}

/// Snapshot of the collaboration layer's connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorState {
    pub connected: bool,
    pub synced: bool,
}

impl IndicatorState {
    /// Whether real-time sync is fully active.
    pub fn is_active(&self) -> bool {
        self.connected && self.synced
    }

    /// Badge label in the language of the given text direction.
    pub fn label(&self, direction: TextDirection) -> &'static str {
        match (direction, self.is_active()) {
            (TextDirection::Ltr, true) => "Real-time sync active",
            (TextDirection::Ltr, false) => "Connecting...",
            (TextDirection::Rtl, true) => "المزامنة الفورية نشطة",
            (TextDirection::Rtl, false) => "جارٍ الاتصال...",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requires_both_flags() {
        assert!(
            IndicatorState {
                connected: true,
                synced: true
            }
            .is_active()
        );
        // Connected but still catching up is not active
        assert!(
            !IndicatorState {
                connected: true,
                synced: false
            }
            .is_active()
        );
        assert!(
            !IndicatorState {
                connected: false,
                synced: false
            }
            .is_active()
        );
    }

    #[test]
    fn test_labels_per_direction() {
        let active = IndicatorState {
            connected: true,
            synced: true,
        };
        assert_eq!(active.label(TextDirection::Ltr), "Real-time sync active");
        assert_eq!(active.label(TextDirection::Rtl), "المزامنة الفورية نشطة");

        let pending = IndicatorState {
            connected: false,
            synced: false,
        };
        assert_eq!(pending.label(TextDirection::Ltr), "Connecting...");
        assert_eq!(pending.label(TextDirection::Rtl), "جارٍ الاتصال...");
    }
}
