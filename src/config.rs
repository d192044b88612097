//! Process configuration, read once from the environment at start-up.
use std::env;
use std::str::FromStr;
use std::time::Duration;
use reqwest::Url;
use crate::delegations;
use crate::delegations::Registry;
use crate::delegations::Selection;


const DEFAULT_REGISTRY: Registry = Registry::Apnic;
const DEFAULT_COUNTRY: &str = "CN";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;


//------------ ReadErrorPolicy ----------------------------------------------

/// What to do with the prefixes found so far when reading the stats file
/// fails before its end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadErrorPolicy {
    /// Upload nothing.
    Abort,

    /// Upload what was parsed before the error.
    UploadPartial,
}


//------------ BucketConfig -------------------------------------------------

/// Where and as whom to upload.
///
/// The bucket is given as its base URL, either virtual hosted, e.g.
/// `https://examplebucket-1250000000.cos.ap-guangzhou.myqcloud.com`, where
/// the first host label is the bucket name and the rest is the service
/// endpoint, or path style, e.g. `http://127.0.0.1:9000/prefixes`, where the
/// only path segment is the bucket name and the host is the endpoint. Bucket
/// names containing dots need the path style form.
#[derive(Clone, Eq, PartialEq)]
pub struct BucketConfig {
    name: String,
    endpoint: String,
    region: String,
    path_style: bool,
    access_key: String,
    secret_key: String,
}

impl BucketConfig {
    pub fn parse(
        url: &str,
        region: Option<String>,
        access_key: String,
        secret_key: String
    ) -> Result<Self, Error> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::InvalidBucketUrl(format!("{}: {}", url, e)))?;

        let host = parsed.host_str()
            .ok_or_else(|| Error::InvalidBucketUrl(format!("{}: no host", url)))?;

        let path = parsed.path().trim_matches('/');
        let (name, service_host, path_style) = if path.is_empty() {
            let mut labels = host.splitn(2, '.');
            let name = labels.next().unwrap_or("");
            let service_host = labels.next().unwrap_or("");
            if name.is_empty() || service_host.is_empty() {
                return Err(Error::InvalidBucketUrl(
                    format!("{}: expected <bucket>.<endpoint>", url)
                ))
            }
            (name, service_host, false)
        } else if path.contains('/') {
            return Err(Error::InvalidBucketUrl(
                format!("{}: expected <endpoint>/<bucket>", url)
            ))
        } else {
            (path, host, true)
        };

        let endpoint = match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), service_host, port),
            None => format!("{}://{}", parsed.scheme(), service_host)
        };

        let region = region
            .or_else(|| Self::infer_region(service_host))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(BucketConfig {
            name: name.to_string(),
            endpoint,
            region,
            path_style,
            access_key,
            secret_key
        })
    }

    /// Guesses the region from endpoints like `cos.ap-guangzhou.myqcloud.com`,
    /// `s3.eu-west-1.amazonaws.com` or `s3-eu-west-1.amazonaws.com`.
    ///
    /// The global `s3.amazonaws.com` names no region.
    fn infer_region(service_host: &str) -> Option<String> {
        let labels: Vec<&str> = service_host.split('.').collect();
        match labels.as_slice() {
            [service, region, _, _, ..] if *service == "cos" || *service == "s3" => {
                Some(region.to_string())
            }
            [service, "amazonaws", "com"] => {
                service.strip_prefix("s3-")
                    .filter(|region| *region != "external-1")
                    .map(|region| region.to_string())
            }
            _ => None
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn endpoint(&self) -> &str { &self.endpoint }
    pub fn region(&self) -> &str { &self.region }
    pub fn path_style(&self) -> bool { self.path_style }
    pub fn access_key(&self) -> &str { &self.access_key }
    pub fn secret_key(&self) -> &str { &self.secret_key }
}

// keep the secret out of logs
impl std::fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BucketConfig")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .field("access_key", &self.access_key)
            .finish()
    }
}


//------------ Config -------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    source_url: String,
    selection: Selection,
    object_key: String,
    bucket: BucketConfig,
    read_errors: ReadErrorPolicy,
    upload_empty: bool,
    fetch_timeout: Duration,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Builds the configuration from a variable lookup. Empty values count
    /// as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, Error>
    where F: Fn(&str) -> Option<String> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(Error::MissingVar(name));

        let registry = match var("REGISTRY") {
            Some(s) => Registry::from_str(s.trim())?,
            None => DEFAULT_REGISTRY
        };
        let country = var("COUNTRY").unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
        let selection = Selection::new(registry, country.trim());

        let source_url = var("REGISTRY_URL")
            .unwrap_or_else(|| registry.stats_url().to_string());

        let object_key = var("OBJECT_NAME").unwrap_or_else(|| {
            format!("{}-{}", registry, selection.country().to_ascii_lowercase())
        });

        let bucket = BucketConfig::parse(
            &required("COS_OBJECT_URL")?,
            var("COS_REGION"),
            required("COS_SECRETID")?,
            required("COS_SECRETKEY")?,
        )?;

        let read_errors = if flag(var("UPLOAD_PARTIAL"), "UPLOAD_PARTIAL")? {
            ReadErrorPolicy::UploadPartial
        } else {
            ReadErrorPolicy::Abort
        };
        let upload_empty = flag(var("UPLOAD_EMPTY"), "UPLOAD_EMPTY")?;

        let fetch_timeout = match var("FETCH_TIMEOUT_SECS") {
            Some(s) => {
                let secs = u64::from_str(s.trim()).map_err(|_| {
                    Error::InvalidValue("FETCH_TIMEOUT_SECS", s.clone())
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)
        };

        Ok(Config {
            source_url,
            selection,
            object_key,
            bucket,
            read_errors,
            upload_empty,
            fetch_timeout
        })
    }

    pub fn source_url(&self) -> &str { &self.source_url }
    pub fn selection(&self) -> &Selection { &self.selection }
    pub fn object_key(&self) -> &str { &self.object_key }
    pub fn bucket(&self) -> &BucketConfig { &self.bucket }
    pub fn read_errors(&self) -> ReadErrorPolicy { self.read_errors }

    /// Whether an empty list replaces the object. Off by default, so a
    /// stats file without any of the country's records does not wipe it.
    pub fn upload_empty(&self) -> bool { self.upload_empty }

    pub fn fetch_timeout(&self) -> Duration { self.fetch_timeout }

    pub fn with_read_errors(mut self, policy: ReadErrorPolicy) -> Self {
        self.read_errors = policy;
        self
    }

    pub fn with_upload_empty(mut self, upload_empty: bool) -> Self {
        self.upload_empty = upload_empty;
        self
    }
}

/// Reads a boolean variable, unset meaning false.
fn flag(value: Option<String>, name: &'static str) -> Result<bool, Error> {
    match value {
        Some(s) => match s.trim() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(Error::InvalidValue(name, other.to_string()))
        },
        None => Ok(false)
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "Missing environment variable {}", _0)]
    MissingVar(&'static str),

    #[display(fmt = "Invalid value for {}: {}", _0, _1)]
    InvalidValue(&'static str, String),

    #[display(fmt = "Invalid bucket URL {}", _0)]
    InvalidBucketUrl(String),

    #[display(fmt = "{}", _0)]
    Registry(delegations::Error),
}

impl From<delegations::Error> for Error {
    fn from(e: delegations::Error) -> Self { Error::Registry(e) }
}

impl std::error::Error for Error {}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    const BUCKET_VARS: [(&str, &str); 3] = [
        ("COS_OBJECT_URL", "https://examplebucket-1250000000.cos.ap-guangzhou.myqcloud.com"),
        ("COS_SECRETID", "AKIDEXAMPLE"),
        ("COS_SECRETKEY", "secret"),
    ];

    #[test]
    fn should_use_defaults() {
        let config = Config::from_vars(vars(&BUCKET_VARS)).unwrap();

        assert_eq!(
            "http://ftp.apnic.net/apnic/stats/apnic/delegated-apnic-latest",
            config.source_url()
        );
        assert_eq!(&Selection::new(Registry::Apnic, "CN"), config.selection());
        assert_eq!("apnic-cn", config.object_key());
        assert_eq!(ReadErrorPolicy::Abort, config.read_errors());
        assert!(!config.upload_empty());
        assert_eq!(Duration::from_secs(300), config.fetch_timeout());

        let bucket = config.bucket();
        assert_eq!("examplebucket-1250000000", bucket.name());
        assert_eq!("https://cos.ap-guangzhou.myqcloud.com", bucket.endpoint());
        assert_eq!("ap-guangzhou", bucket.region());
        assert_eq!("AKIDEXAMPLE", bucket.access_key());
        assert_eq!("secret", bucket.secret_key());
    }

    #[test]
    fn should_read_overrides() {
        let mut pairs = BUCKET_VARS.to_vec();
        pairs.extend_from_slice(&[
            ("REGISTRY", "ripencc"),
            ("COUNTRY", "nl"),
            ("OBJECT_NAME", "prefixes/nl.txt"),
            ("UPLOAD_PARTIAL", "true"),
            ("UPLOAD_EMPTY", "yes"),
            ("FETCH_TIMEOUT_SECS", "30"),
            ("COS_REGION", "eu-frankfurt"),
        ]);
        let config = Config::from_vars(vars(&pairs)).unwrap();

        assert_eq!(
            "https://ftp.ripe.net/pub/stats/ripencc/delegated-ripencc-latest",
            config.source_url()
        );
        assert_eq!("NL", config.selection().country());
        assert_eq!("prefixes/nl.txt", config.object_key());
        assert_eq!(ReadErrorPolicy::UploadPartial, config.read_errors());
        assert!(config.upload_empty());
        assert_eq!(Duration::from_secs(30), config.fetch_timeout());
        assert_eq!("eu-frankfurt", config.bucket().region());
    }

    #[test]
    fn should_derive_object_key() {
        let mut pairs = BUCKET_VARS.to_vec();
        pairs.push(("COUNTRY", "jp"));
        let config = Config::from_vars(vars(&pairs)).unwrap();
        assert_eq!("apnic-jp", config.object_key());
    }

    #[test]
    fn should_require_credentials() {
        let pairs = [BUCKET_VARS[0], BUCKET_VARS[1]];
        match Config::from_vars(vars(&pairs)) {
            Err(Error::MissingVar("COS_SECRETKEY")) => {},
            other => panic!("unexpected: {:?}", other)
        }

        let pairs = [BUCKET_VARS[0], BUCKET_VARS[1], ("COS_SECRETKEY", "  ")];
        match Config::from_vars(vars(&pairs)) {
            Err(Error::MissingVar("COS_SECRETKEY")) => {},
            other => panic!("unexpected: {:?}", other)
        }
    }

    #[test]
    fn should_reject_bad_values() {
        let mut pairs = BUCKET_VARS.to_vec();
        pairs.push(("REGISTRY", "iana"));
        assert!(Config::from_vars(vars(&pairs)).is_err());

        let mut pairs = BUCKET_VARS.to_vec();
        pairs.push(("UPLOAD_PARTIAL", "maybe"));
        assert!(Config::from_vars(vars(&pairs)).is_err());

        let mut pairs = BUCKET_VARS.to_vec();
        pairs.push(("UPLOAD_EMPTY", "perhaps"));
        match Config::from_vars(vars(&pairs)) {
            Err(Error::InvalidValue("UPLOAD_EMPTY", _)) => {},
            other => panic!("unexpected: {:?}", other)
        }

        let mut pairs = BUCKET_VARS.to_vec();
        pairs.push(("FETCH_TIMEOUT_SECS", "soon"));
        assert!(Config::from_vars(vars(&pairs)).is_err());
    }

    #[test]
    fn should_parse_bucket_urls() {
        let key = || "id".to_string();
        let secret = || "secret".to_string();

        let s3 = BucketConfig::parse(
            "https://my-bucket.s3.eu-west-1.amazonaws.com/", None, key(), secret()
        ).unwrap();
        assert_eq!("my-bucket", s3.name());
        assert_eq!("https://s3.eu-west-1.amazonaws.com", s3.endpoint());
        assert_eq!("eu-west-1", s3.region());

        let minio = BucketConfig::parse(
            "http://prefixes.minio.local:9000", None, key(), secret()
        ).unwrap();
        assert_eq!("prefixes", minio.name());
        assert_eq!("http://minio.local:9000", minio.endpoint());
        assert_eq!("us-east-1", minio.region());

        let global = BucketConfig::parse(
            "https://my-bucket.s3.amazonaws.com", None, key(), secret()
        ).unwrap();
        assert_eq!("my-bucket", global.name());
        assert_eq!("https://s3.amazonaws.com", global.endpoint());
        assert_eq!("us-east-1", global.region());

        let legacy = BucketConfig::parse(
            "https://my-bucket.s3-ap-southeast-1.amazonaws.com", None, key(), secret()
        ).unwrap();
        assert_eq!("ap-southeast-1", legacy.region());

        let external = BucketConfig::parse(
            "https://my-bucket.s3-external-1.amazonaws.com", None, key(), secret()
        ).unwrap();
        assert_eq!("us-east-1", external.region());

        assert!(!s3.path_style());
        assert!(!minio.path_style());

        assert!(BucketConfig::parse("not a url", None, key(), secret()).is_err());
        assert!(BucketConfig::parse("http://localhost", None, key(), secret()).is_err());
    }

    #[test]
    fn should_parse_path_style_bucket_urls() {
        let key = || "id".to_string();
        let secret = || "secret".to_string();

        let local = BucketConfig::parse(
            "http://127.0.0.1:9000/prefixes/", None, key(), secret()
        ).unwrap();
        assert_eq!("prefixes", local.name());
        assert_eq!("http://127.0.0.1:9000", local.endpoint());
        assert_eq!("us-east-1", local.region());
        assert!(local.path_style());

        let dotted = BucketConfig::parse(
            "https://s3.eu-west-1.amazonaws.com/prefixes.example.com", None, key(), secret()
        ).unwrap();
        assert_eq!("prefixes.example.com", dotted.name());
        assert_eq!("https://s3.eu-west-1.amazonaws.com", dotted.endpoint());
        assert_eq!("eu-west-1", dotted.region());
        assert!(dotted.path_style());

        match BucketConfig::parse(
            "https://my-bucket.s3.amazonaws.com/some/folder", None, key(), secret()
        ) {
            Err(Error::InvalidBucketUrl(_)) => {},
            other => panic!("unexpected: {:?}", other)
        }
    }

    #[test]
    fn should_not_log_secret() {
        let config = Config::from_vars(vars(&BUCKET_VARS)).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret\""));
    }
}
