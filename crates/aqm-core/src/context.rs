//! Device context signals consulted before maintenance runs.

use aqm_proto::Tier;

/// Answers "is this a good moment to spend battery and bandwidth".
pub trait ContextOracle: Send + Sync {
    /// True when maintenance (minting, replenishment) should run.
    fn is_ideal_state(&self) -> bool;

    /// Tier to prefer for outgoing messages under current conditions.
    fn select_tier(&self) -> Tier;
}

/// Static snapshot of device conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceContext {
    /// Battery charge, 0 to 100.
    pub battery_pct: u8,
    /// On wifi rather than cellular.
    pub wifi_connected: bool,
    /// Cellular signal strength in dBm.
    pub signal_dbm: i16,
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self { battery_pct: 100, wifi_connected: true, signal_dbm: -70 }
    }
}

impl ContextOracle for DeviceContext {
    fn is_ideal_state(&self) -> bool {
        self.battery_pct > 20 && self.wifi_connected
    }

    fn select_tier(&self) -> Tier {
        if self.battery_pct < 5 {
            return Tier::Bronze;
        }
        if !self.wifi_connected {
            return if self.signal_dbm < -100 { Tier::Bronze } else { Tier::Silver };
        }
        match self.battery_pct {
            0..20 => Tier::Bronze,
            20..50 => Tier::Silver,
            _ => Tier::Gold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(battery_pct: u8, wifi_connected: bool, signal_dbm: i16) -> DeviceContext {
        DeviceContext { battery_pct, wifi_connected, signal_dbm }
    }

    #[test]
    fn ideal_needs_wifi_and_charge() {
        assert!(ctx(80, true, -70).is_ideal_state());
        assert!(!ctx(20, true, -70).is_ideal_state());
        assert!(!ctx(80, false, -70).is_ideal_state());
    }

    #[test]
    fn tier_selection() {
        assert_eq!(ctx(4, true, -50).select_tier(), Tier::Bronze);
        assert_eq!(ctx(60, false, -110).select_tier(), Tier::Bronze);
        assert_eq!(ctx(60, false, -90).select_tier(), Tier::Silver);
        assert_eq!(ctx(10, true, -50).select_tier(), Tier::Bronze);
        assert_eq!(ctx(30, true, -50).select_tier(), Tier::Silver);
        assert_eq!(ctx(50, true, -50).select_tier(), Tier::Gold);
    }
}
