//! IPv4 prefixes as found in delegated stats
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use ipnetwork::IpNetworkError;
use ipnetwork::Ipv4Network;


//------------ IpPrefix -----------------------------------------------------

/// An IPv4 network in CIDR notation.
///
/// The address is always the network address: any host bits set in the
/// input are cleared, so "1.2.3.4/24" becomes "1.2.3.0/24".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IpPrefix(Ipv4Network);

impl IpPrefix {
    pub fn new(address: Ipv4Addr, length: u8) -> Result<Self, IpPrefixError> {
        let net = Ipv4Network::new(address, length)
            .map_err(|_| IpPrefixError::LengthOutOfRange(i64::from(length)))?;
        // mask host bits
        let net = Ipv4Network::new(net.network(), length)?;
        Ok(IpPrefix(net))
    }

    /// Creates the prefix covering `number` addresses starting at `min`.
    ///
    /// Delegated stats express IPv4 blocks as a start address and an address
    /// count, so the count has to be a power of two for the block to be a
    /// single prefix.
    pub fn from_min_and_number(
        min: Ipv4Addr,
        number: u64
    ) -> Result<Self, IpPrefixError> {
        let length = prefix_length(number)?;
        IpPrefix::new(min, length)
    }

    pub fn address(&self) -> Ipv4Addr { self.0.network() }
    pub fn length(&self) -> u8 { self.0.prefix() }
}

impl FromStr for IpPrefix {
    type Err = IpPrefixError;

    /// Expects: "a.b.c.d/len"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut values = s.split('/');
        let addr_str = values.next().unwrap_or("");
        let len_str = values.next()
            .ok_or_else(|| IpPrefixError::ParseError(
                format!("expected address/length: {}", s)
            ))?;

        if values.next().is_some() {
            return Err(IpPrefixError::ParseError(
                format!("expected address/length: {}", s)
            ))
        }

        let address = parse_address(addr_str)?;
        let length = u8::from_str(len_str).map_err(|_| {
            IpPrefixError::ParseError(format!("invalid length: {}", len_str))
        })?;

        IpPrefix::new(address, length)
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address(), self.length())
    }
}


//------------ Helpers ------------------------------------------------------

/// Parses a dotted quad IPv4 address.
pub fn parse_address(s: &str) -> Result<Ipv4Addr, IpPrefixError> {
    Ipv4Addr::from_str(s)
        .map_err(|_| IpPrefixError::InvalidAddress(s.to_string()))
}

/// Returns the prefix length for a block of `number` IPv4 addresses, that
/// is 32 - log2(number).
pub fn prefix_length(number: u64) -> Result<u8, IpPrefixError> {
    if number == 0 {
        return Err(IpPrefixError::ZeroCount)
    }
    if !number.is_power_of_two() {
        return Err(IpPrefixError::CountNotPowerOfTwo(number))
    }

    let length = 32 - i64::from(number.trailing_zeros());
    if length < 0 {
        return Err(IpPrefixError::LengthOutOfRange(length))
    }
    Ok(length as u8)
}


//------------ IpPrefixError ------------------------------------------------

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum IpPrefixError {
    #[display(fmt = "Invalid IPv4 address: {}", _0)]
    InvalidAddress(String),

    #[display(fmt = "Address count is zero")]
    ZeroCount,

    #[display(fmt = "Address count {} is not a power of two", _0)]
    CountNotPowerOfTwo(u64),

    #[display(fmt = "Prefix length {} outside of 0-32", _0)]
    LengthOutOfRange(i64),

    #[display(fmt = "Parse error: {}", _0)]
    ParseError(String),
}

impl From<IpNetworkError> for IpPrefixError {
    fn from(e: IpNetworkError) -> Self {
        IpPrefixError::ParseError(e.to_string())
    }
}

impl std::error::Error for IpPrefixError {}


//------------ Tests --------------------------------------------------------
