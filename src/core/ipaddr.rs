use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::SpfError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn cells(self) -> usize {
        match self {
            Self::V4 => 4,
            Self::V6 => 8,
        }
    }

    fn cell_bits(self) -> u32 {
        match self {
            Self::V4 => 8,
            Self::V6 => 16,
        }
    }

    fn full_cell(self) -> u16 {
        match self {
            Self::V4 => 0xFF,
            Self::V6 => 0xFFFF,
        }
    }

    fn max_mask(self) -> u32 {
        self.cells() as u32 * self.cell_bits()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddress {
    family: Family,
    cells: [u16; 8],
    mask: [u16; 8],
    mask_length: u32,
}

impl IpAddress {
    pub fn parse(text: &str) -> Result<Self, SpfError> {
        Self::parse_with_mask(text, None)
    }

    /// Parses an address literal. A mask outside the family range falls back
    /// to the full length.
    pub fn parse_with_mask(text: &str, mask_length: Option<u32>) -> Result<Self, SpfError> {
        let mut address = Self::from(parse_literal(text)?);
        if let Some(length) = mask_length {
            address.set_mask(length);
        }
        Ok(address)
    }

    pub fn set_mask(&mut self, length: u32) {
        let family = self.family;
        let length = if length <= family.max_mask() {
            length
        } else {
            family.max_mask()
        };
        let bits = family.cell_bits();
        let full = family.full_cell();

        self.mask_length = length;
        self.mask = [0; 8];
        for (index, cell) in self.mask.iter_mut().take(family.cells()).enumerate() {
            let start = index as u32 * bits;
            let end = start + bits;
            *cell = if end <= length {
                full
            } else if start < length {
                (full << (end - length)) & full
            } else {
                0
            };
        }
    }

    pub fn mask_length(&self) -> u32 {
        self.mask_length
    }

    pub fn is_ipv4(&self) -> bool {
        self.family == Family::V4
    }

    pub fn is_ipv6(&self) -> bool {
        self.family == Family::V6
    }

    pub fn contains(&self, other: &IpAddress) -> bool {
        self.family == other.family && self.masked(&self.cells) == self.masked(&other.cells)
    }

    pub fn masked_address(&self) -> String {
        self.to_std(&self.masked(&self.cells)).to_string()
    }

    /// Lowercase nibbles separated by dots, as used by the `i` macro for IPv6.
    /// IPv4 addresses keep their dotted decimal form.
    pub fn nibble_format(&self) -> String {
        match self.family {
            Family::V4 => self.to_string(),
            Family::V6 => self.nibbles().join("."),
        }
    }

    pub fn reverse_ip(&self) -> String {
        match self.family {
            Family::V4 => {
                let octets: Vec<String> = self.cells[..4]
                    .iter()
                    .rev()
                    .map(|cell| cell.to_string())
                    .collect();
                format!("{}.in-addr.arpa", octets.join("."))
            }
            Family::V6 => {
                let mut nibbles = self.nibbles();
                nibbles.reverse();
                format!("{}.ip6.arpa", nibbles.join("."))
            }
        }
    }

    pub fn in_address_label(&self) -> &'static str {
        match self.family {
            Family::V4 => "in-addr",
            Family::V6 => "ip6",
        }
    }

    pub fn in_address(text: &str) -> Result<&'static str, SpfError> {
        Ok(Self::parse(text)?.in_address_label())
    }

    pub fn is_valid(text: &str) -> bool {
        parse_literal(text).is_ok()
    }

    pub fn is_ipv6_literal(text: &str) -> bool {
        matches!(parse_literal(text), Ok(IpAddr::V6(_)))
    }

    pub fn readable_ip(text: &str) -> String {
        match parse_literal(text) {
            Ok(address) => address.to_string(),
            Err(_) => text.to_string(),
        }
    }

    /// Normalizes a client address, turning IPv4-mapped IPv6 addresses into
    /// their dotted IPv4 form.
    pub fn proper_ip_address(text: &str) -> Result<String, SpfError> {
        match parse_literal(text)? {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Ok(v4.to_string()),
                None => Ok(text.trim().to_string()),
            },
            IpAddr::V4(_) => Ok(text.trim().to_string()),
        }
    }

    fn masked(&self, cells: &[u16; 8]) -> [u16; 8] {
        let mut out = [0; 8];
        for (index, slot) in out.iter_mut().enumerate() {
            *slot = cells[index] & self.mask[index];
        }
        out
    }

    fn nibbles(&self) -> Vec<String> {
        self.cells
            .iter()
            .flat_map(|word| format!("{word:04x}").chars().collect::<Vec<_>>())
            .map(String::from)
            .collect()
    }

    fn to_std(&self, cells: &[u16; 8]) -> IpAddr {
        match self.family {
            Family::V4 => IpAddr::V4(Ipv4Addr::new(
                cells[0] as u8,
                cells[1] as u8,
                cells[2] as u8,
                cells[3] as u8,
            )),
            Family::V6 => IpAddr::V6(Ipv6Addr::from(*cells)),
        }
    }
}

impl From<IpAddr> for IpAddress {
    fn from(address: IpAddr) -> Self {
        let (family, cells) = match address {
            IpAddr::V4(v4) => {
                let mut cells = [0; 8];
                for (slot, octet) in cells.iter_mut().zip(v4.octets()) {
                    *slot = u16::from(octet);
                }
                (Family::V4, cells)
            }
            IpAddr::V6(v6) => (Family::V6, v6.segments()),
        };
        let mut out = Self {
            family,
            cells,
            mask: [0; 8],
            mask_length: 0,
        };
        out.set_mask(family.max_mask());
        out
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_std(&self.cells))
    }
}

fn parse_literal(text: &str) -> Result<IpAddr, SpfError> {
    let trimmed = text.trim();
    trimmed
        .parse::<IpAddr>()
        .map_err(|_| SpfError::perm(format!("Not a valid address: {trimmed}")))
}
