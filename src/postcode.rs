use std::fmt::Formatter;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CEP_PATTERN: Regex = Regex::new(r"^(\d{5})-?(\d{3})$")
        .expect("Could not create CEP regex");
}

/// Brazilian postal code, stored as its 8-digit numeric value.
///
/// Renders as `NNNNN-NNN`. Because the rendering is fixed width, the
/// lexicographic order of the canonical strings matches the numeric order,
/// which the store relies on for range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cep(u32);

impl Cep {
    pub const MAX: Cep = Cep(99_999_999);

    pub fn new(value: u32) -> Option<Cep> {
        if value <= Self::MAX.0 {
            Some(Cep(value))
        } else {
            None
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// The bare 8 digits, as expected by the upstream lookup services.
    pub fn digits(self) -> String {
        format!("{:08}", self.0)
    }

    pub fn checked_next(self) -> Option<Cep> {
        self.checked_add(1)
    }

    pub fn checked_prev(self) -> Option<Cep> {
        self.0.checked_sub(1).map(Cep)
    }

    pub fn checked_add(self, delta: u32) -> Option<Cep> {
        self.0.checked_add(delta).and_then(Cep::new)
    }
}

impl std::fmt::Display for Cep {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:05}-{:03}", self.0 / 1000, self.0 % 1000)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidCep(pub String);

impl std::fmt::Display for InvalidCep {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Invalid CEP '{}', expected NNNNN-NNN or NNNNNNNN", self.0)
    }
}

impl std::error::Error for InvalidCep {}

impl FromStr for Cep {
    type Err = InvalidCep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = CEP_PATTERN
            .captures(s.trim())
            .ok_or_else(|| InvalidCep(s.to_owned()))?;
        let digits = format!("{}{}", &caps[1], &caps[2]);
        digits
            .parse::<u32>()
            .map(Cep)
            .map_err(|_| InvalidCep(s.to_owned()))
    }
}

/// Inclusive range of postal codes to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CepRange {
    pub start: Cep,
    pub end: Cep,
}

impl CepRange {
    pub fn new(start: Cep, end: Cep) -> Option<CepRange> {
        if start <= end {
            Some(CepRange { start, end })
        } else {
            None
        }
    }

    pub fn contains(&self, cep: Cep) -> bool {
        self.start <= cep && cep <= self.end
    }
}

impl std::fmt::Display for CepRange {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
