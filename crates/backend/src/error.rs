use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("backend base URL '{raw}' is invalid: {source}"))]
    InvalidBaseUrl {
        stage: &'static str,
        raw: String,
        source: url::ParseError,
    },
    #[snafu(display("endpoint path '{path}' cannot be joined to the base URL: {source}"))]
    InvalidEndpoint {
        stage: &'static str,
        path: String,
        source: url::ParseError,
    },
    #[snafu(display("http client failed to build on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to build multipart upload for '{file_name}': {source}"))]
    BuildMultipart {
        stage: &'static str,
        file_name: String,
        source: reqwest::Error,
    },
    #[snafu(display("request to '{endpoint}' failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("endpoint '{endpoint}' returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body from '{endpoint}': {source}"))]
    ReadBody {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode response from '{endpoint}': {source}"))]
    Decode {
        stage: &'static str,
        endpoint: String,
        source: serde_json::Error,
    },
    #[snafu(display("chat stream read failed on `{stage}`, {source}"))]
    StreamRead {
        stage: &'static str,
        source: reqwest::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
