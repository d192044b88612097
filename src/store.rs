//! Upload results to an S3 compatible bucket
use s3::Bucket;
use s3::region::Region;
use s3::creds::Credentials;
use s3::creds::error::CredentialsError;
use s3::error::S3Error;
use tracing::{debug, info, instrument};
use crate::config::BucketConfig;


const CONTENT_TYPE: &str = "text/plain";


//------------ ObjectStore --------------------------------------------------

/// A place to write a named object to.
///
/// Writing an existing key replaces the object as a whole.
pub trait ObjectStore {
    fn put(&self, key: &str, content: &[u8]) -> Result<(), Error>;
}


//------------ BucketStore --------------------------------------------------

/// An S3 compatible bucket, e.g. on Tencent COS, AWS S3 or MinIO.
pub struct BucketStore {
    bucket: Box<Bucket>,
}

impl BucketStore {
    pub fn new(config: &BucketConfig) -> Result<Self, Error> {
        let credentials = Credentials::new(
            Some(config.access_key()),
            Some(config.secret_key()),
            None,
            None,
            None,
        )?;

        let region = Region::Custom {
            region: config.region().to_string(),
            endpoint: config.endpoint().to_string(),
        };

        let mut bucket = Bucket::new(config.name(), region, credentials)?;
        if config.path_style() {
            bucket = bucket.with_path_style();
        }
        debug!(
            bucket = config.name(),
            endpoint = config.endpoint(),
            path_style = config.path_style(),
            "bucket configured"
        );

        Ok(BucketStore { bucket })
    }
}

impl ObjectStore for BucketStore {
    #[instrument(skip(self, content), fields(len = content.len()))]
    fn put(&self, key: &str, content: &[u8]) -> Result<(), Error> {
        let path = format!("/{}", key);
        debug!(
            url = %self.bucket.url(),
            %path,
            content_type = CONTENT_TYPE,
            "uploading object"
        );

        let response = self.bucket
            .put_object_with_content_type(&path, content, CONTENT_TYPE)?;

        let status = response.status_code();
        debug!(status, headers = ?response.headers(), "object store response");
        if !(200..300).contains(&status) {
            return Err(Error::Status(status))
        }

        info!(status, "object uploaded");
        Ok(())
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "Invalid credentials: {}", _0)]
    Credentials(CredentialsError),

    #[display(fmt = "Object store request failed: {}", _0)]
    Request(S3Error),

    #[display(fmt = "Object store answered with status {}", _0)]
    Status(u16),
}

impl From<CredentialsError> for Error {
    fn from(e: CredentialsError) -> Self { Error::Credentials(e) }
}

impl From<S3Error> for Error {
    fn from(e: S3Error) -> Self { Error::Request(e) }
}

impl std::error::Error for Error {}


//------------ Tests --------------------------------------------------------
