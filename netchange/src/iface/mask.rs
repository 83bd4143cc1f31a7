//! Interest mask selecting which event classes reach the handlers.

use std::fmt;

use crate::{error::MonitorError, iface::types::EventClass};

const LINK: u8 = 0b001;
const ADDRESS: u8 = 0b010;
const ROUTE: u8 = 0b100;

/// A non-empty subset of {link, address, route}.
///
/// Built once at startup from the raw configuration value and never
/// changed for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestMask(u8);

impl InterestMask {
    pub const ALL: InterestMask = InterestMask(LINK | ADDRESS | ROUTE);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_enabled(&self, class: EventClass) -> bool {
        self.0 & Self::bit(class) != 0
    }

    pub fn classes(&self) -> Vec<EventClass> {
        EventClass::ALL
            .into_iter()
            .filter(|class| self.is_enabled(*class))
            .collect()
    }

    fn bit(class: EventClass) -> u8 {
        match class {
            EventClass::Link => LINK,
            EventClass::Address => ADDRESS,
            EventClass::Route => ROUTE,
        }
    }
}

impl Default for InterestMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl TryFrom<u8> for InterestMask {
    type Error = MonitorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1..=7 => Ok(Self(value)),
            _ => Err(MonitorError::InvalidInterestMask(value)),
        }
    }
}

impl fmt::Display for InterestMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.classes().iter().map(EventClass::as_str).collect();
        write!(f, "{}", names.join("+"))
    }
}
