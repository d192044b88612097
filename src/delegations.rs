//! Parse delegated stats
//!
//! The RIRs publish their allocations as pipe separated lines:
//!
//! ```text
//! registry|cc|type|start|value|date|status[|extensions...]
//! ```
//!
//! Records are grouped by type (asn, ipv4, ipv6), so all IPv4 records of a
//! file are seen before the first IPv6 record.
use std::fmt;
use std::io;
use std::io::BufRead;
use std::num::ParseIntError;
use std::str::FromStr;
use crate::ip;
use crate::ip::IpPrefix;
use crate::ip::IpPrefixError;


//------------ Registry -----------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Registry {
    Afrinic,
    Apnic,
    Arin,
    Lacnic,
    RipeNcc
}

impl Registry {
    pub fn as_str(self) -> &'static str {
        match self {
            Registry::Afrinic => "afrinic",
            Registry::Apnic   => "apnic",
            Registry::Arin    => "arin",
            Registry::Lacnic  => "lacnic",
            Registry::RipeNcc => "ripencc",
        }
    }

    /// The public location of the most recent stats file of this registry.
    pub fn stats_url(self) -> &'static str {
        match self {
            Registry::Afrinic =>
                "https://ftp.afrinic.net/pub/stats/afrinic/delegated-afrinic-latest",
            Registry::Apnic =>
                "http://ftp.apnic.net/apnic/stats/apnic/delegated-apnic-latest",
            Registry::Arin =>
                "https://ftp.arin.net/pub/stats/arin/delegated-arin-extended-latest",
            Registry::Lacnic =>
                "https://ftp.lacnic.net/pub/stats/lacnic/delegated-lacnic-latest",
            Registry::RipeNcc =>
                "https://ftp.ripe.net/pub/stats/ripencc/delegated-ripencc-latest",
        }
    }
}

impl FromStr for Registry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "afrinic" => Ok(Registry::Afrinic),
            "apnic"   => Ok(Registry::Apnic),
            "arin"    => Ok(Registry::Arin),
            "lacnic"  => Ok(Registry::Lacnic),
            "ripencc" => Ok(Registry::RipeNcc),
            r => Err(Error::UnknownRegistry(r.to_string()))
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


//------------ Selection ----------------------------------------------------

/// The IPv4 delegations of one country in one registry's stats file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selection {
    registry: Registry,
    country: String,
    ipv4_marker: String,
    registry_marker: String,
}

impl Selection {
    pub fn new(registry: Registry, country: &str) -> Self {
        let country = country.to_ascii_uppercase();
        let ipv4_marker = format!("{}|{}|ipv4", registry, country);
        let registry_marker = format!("{}|", registry);
        Selection { registry, country, ipv4_marker, registry_marker }
    }

    pub fn registry(&self) -> Registry { self.registry }
    pub fn country(&self) -> &str { &self.country }

    /// Whether the line is an IPv4 record of the selected country.
    pub fn is_selected(&self, line: &str) -> bool {
        line.starts_with(&self.ipv4_marker)
    }

    /// Whether the line is the first of the IPv6 section, i.e. any country's
    /// IPv6 record of this registry. Summary lines use "*" for the country
    /// and do not count.
    pub fn ends_section(&self, line: &str) -> bool {
        let rest = match line.strip_prefix(self.registry_marker.as_str()) {
            Some(rest) => rest,
            None => return false
        };

        let mut values = rest.splitn(3, '|');
        let cc = values.next().unwrap_or("");
        let inr_type = values.next();

        cc.len() == 2
            && cc.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && inr_type == Some("ipv6")
    }
}


//------------ Line parsing -------------------------------------------------

/// Parses an IPv4 delegation line into the prefix it covers.
pub fn parse_line(line: &str) -> Result<IpPrefix, Error> {
    let mut values = line.split('|');

    let _reg_str = values.next().ok_or(Error::MissingColumn("registry"))?;
    let _cc_str = values.next().ok_or(Error::MissingColumn("country"))?;
    let _type_str = values.next().ok_or(Error::MissingColumn("type"))?;
    let min_str = values.next().ok_or(Error::MissingColumn("start"))?;
    let amount_str = values.next().ok_or(Error::MissingColumn("value"))?;

    let number = u64::from_str(amount_str.trim())?;
    let min = ip::parse_address(min_str.trim())?;
    let prefix = IpPrefix::from_min_and_number(min, number)?;
    Ok(prefix)
}


//------------ Allocations --------------------------------------------------

/// Lazily scans a stats file for the delegations of a selection.
///
/// Yields one item per selected line, either the prefix or the reason the
/// line could not be used. Bytes that are not valid UTF-8 are replaced, so
/// they only make the line they appear in unusable. Iteration stops at the start of the IPv6 section,
/// at the end of input, or after the first read error, which is yielded.
pub struct Allocations<'a, R> {
    reader: R,
    selection: &'a Selection,
    buf: Vec<u8>,
    line_no: usize,
    done: bool,
}

pub fn scan<R: BufRead>(reader: R, selection: &Selection) -> Allocations<'_, R> {
    Allocations {
        reader,
        selection,
        buf: Vec::new(),
        line_no: 0,
        done: false,
    }
}

impl<'a, R> Allocations<'a, R> {
    /// Number of lines read so far.
    pub fn lines_read(&self) -> usize { self.line_no }
}

impl<'a, R: BufRead> Iterator for Allocations<'a, R> {
    type Item = Result<IpPrefix, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                }
                Ok(_) => {
                    self.line_no += 1;
                    let number = self.line_no;

                    // Invalid UTF-8 only spoils the line it is in.
                    let text = String::from_utf8_lossy(&self.buf);
                    let line = text.trim_end_matches(|c: char| c == '\n' || c == '\r');

                    if self.selection.ends_section(line) {
                        self.done = true;
                    } else if self.selection.is_selected(line) {
                        let res = parse_line(line).map_err(|error| {
                            ScanError::Line {
                                number,
                                line: line.to_string(),
                                error
                            }
                        });
                        return Some(res)
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ScanError::Read(e)))
                }
            }
        }
        None
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display, Eq, PartialEq)]
pub enum Error {
    #[display(fmt = "Missing column '{}' in delegated stats line", _0)]
    MissingColumn(&'static str),

    #[display(fmt = "Invalid address count: {}", _0)]
    InvalidCount(ParseIntError),

    #[display(fmt = "{}", _0)]
    InvalidPrefix(IpPrefixError),

    #[display(fmt = "Unknown registry: {}", _0)]
    UnknownRegistry(String),
}

impl From<ParseIntError> for Error {
    fn from(e: ParseIntError) -> Self { Error::InvalidCount(e) }
}

impl From<IpPrefixError> for Error {
    fn from(e: IpPrefixError) -> Self { Error::InvalidPrefix(e) }
}

impl std::error::Error for Error {}


//------------ ScanError ----------------------------------------------------

#[derive(Debug, Display)]
pub enum ScanError {
    #[display(fmt = "line {}: {} ({})", number, error, line)]
    Line {
        number: usize,
        line: String,
        error: Error
    },

    #[display(fmt = "Cannot read delegated stats: {}", _0)]
    Read(io::Error),
}

impl std::error::Error for ScanError {}


//------------ Tests --------------------------------------------------------
