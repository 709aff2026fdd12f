//! Interfaces to the transport and decoder the index engine relies on.

use std::future::Future;

use bitmap::Raster;
use bytes::Bytes;

use crate::error::{DecodeError, LoadError, TransportError};

/// Header carrying the dataset version stamp.
pub const LAST_MODIFIED: &str = "last-modified";

/// Asynchronous GET. A call returns either the body or one header, never both.
pub trait Transport: Send + Sync + 'static {
    fn get_body(&self, url: &str) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    /// Value of header `name`, or `None` when the response lacks it.
    fn get_header(
        &self,
        url: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;
}

/// Turns an encoded image into RGBA8888 pixels.
///
/// Supplied by the caller; the engine never probes for codecs itself.
pub trait RasterDecoder: Send + Sync + 'static {
    fn decode(&self, encoded: &[u8]) -> Result<Raster, DecodeError>;
}

/// GET `url` and decode the body on the current task.
pub async fn fetch_raster<T, D>(transport: &T, decoder: &D, url: &str) -> Result<Raster, LoadError>
where
    T: Transport,
    D: RasterDecoder,
{
    let body = transport.get_body(url).await?;
    Ok(decoder.decode(&body)?)
}
