// SPDX-License-Identifier: AGPL-3.0-only
//! Accounting enumerations (RFC 2866 §5.1, §5.10).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcctStatusType {
    Start,
    Stop,
    InterimUpdate,
    AccountingOn,
    AccountingOff,
}

impl AcctStatusType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Start),
            2 => Some(Self::Stop),
            3 => Some(Self::InterimUpdate),
            7 => Some(Self::AccountingOn),
            8 => Some(Self::AccountingOff),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Start => 1,
            Self::Stop => 2,
            Self::InterimUpdate => 3,
            Self::AccountingOn => 7,
            Self::AccountingOff => 8,
        }
    }

    /// Label used for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::InterimUpdate => "interim-update",
            Self::AccountingOn => "accounting-on",
            Self::AccountingOff => "accounting-off",
        }
    }
}

/// Dictionary names for Acct-Terminate-Cause values 1..=18. Records store the
/// name rather than the number.
const TERMINATE_CAUSES: [&str; 18] = [
    "User-Request",
    "Lost-Carrier",
    "Lost-Service",
    "Idle-Timeout",
    "Session-Timeout",
    "Admin-Reset",
    "Admin-Reboot",
    "Port-Error",
    "NAS-Error",
    "NAS-Request",
    "NAS-Reboot",
    "Port-Unneeded",
    "Port-Preempted",
    "Port-Suspended",
    "Service-Unavailable",
    "Callback",
    "User-Error",
    "Host-Request",
];

/// Cause recorded when the server itself terminates a session.
pub const CAUSE_ADMIN_DISCONNECT: &str = "Admin-Disconnect";

pub fn terminate_cause_name(value: u32) -> String {
    value
        .checked_sub(1)
        .and_then(|idx| TERMINATE_CAUSES.get(idx as usize))
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("Unknown-{value}"))
}

/// Combine a 32-bit octet counter with its gigawords companion (RFC 2869 §5.1).
pub fn octets_with_gigawords(octets: u32, gigawords: u32) -> u64 {
    ((gigawords as u64) << 32) | octets as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_type_values() {
        assert_eq!(AcctStatusType::from_u32(1), Some(AcctStatusType::Start));
        assert_eq!(AcctStatusType::from_u32(2), Some(AcctStatusType::Stop));
        assert_eq!(AcctStatusType::from_u32(3), Some(AcctStatusType::InterimUpdate));
        assert_eq!(AcctStatusType::from_u32(4), None);
        assert_eq!(AcctStatusType::AccountingOff.as_u32(), 8);
    }

    #[test]
    fn terminate_cause_names() {
        assert_eq!(terminate_cause_name(1), "User-Request");
        assert_eq!(terminate_cause_name(6), "Admin-Reset");
        assert_eq!(terminate_cause_name(18), "Host-Request");
        assert_eq!(terminate_cause_name(0), "Unknown-0");
        assert_eq!(terminate_cause_name(42), "Unknown-42");
    }

    #[test]
    fn gigawords_fold_into_high_bits() {
        assert_eq!(octets_with_gigawords(10, 0), 10);
        assert_eq!(octets_with_gigawords(1, 2), (2u64 << 32) + 1);
    }
}
