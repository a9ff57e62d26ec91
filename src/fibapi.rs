//! FIB API client: fetches a subscriber's notices (with a response digest for
//! cheap change detection) and resolves public subject metadata for links.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Europe::Madrid;
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::form_urlencoded;

use crate::model::Subscriber;

const NOTICES_URL: &str = "https://api.fib.upc.edu/v2/jo/avisos.json";
const PUBLIC_SUBJECT_URL_TEMPLATE: &str = "https://api.fib.upc.edu/v2/assignatures/{}.json";
const LOGIN_REDIRECT_BASE_URL: &str = "https://api.fib.upc.edu/v2/accounts/login/?next=";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(20);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum Error {
    #[error("fibapi: authorization has expired")]
    AuthorizationExpired,
    #[error("fibapi: resource not found")]
    ResourceNotFound,
    #[error("fibapi: request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("fibapi: bad response ({status}): {detail}")]
    BadResponse { status: StatusCode, detail: String },
    #[error("fibapi: invalid response JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A timestamp from an API response, parsed in the institution's fixed
/// timezone (`Europe/Madrid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeDate(pub DateTime<Tz>);

impl TimeDate {
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }
}

const TIME_DATE_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";

impl<'de> Deserialize<'de> for TimeDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&s, TIME_DATE_LAYOUT)
            .map_err(serde::de::Error::custom)?;
        // DST-ambiguous local times take the earlier offset.
        Madrid
            .from_local_datetime(&naive)
            .earliest()
            .map(TimeDate)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid local time: {s}")))
    }
}

/// A single notice from `/jo/avisos.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Notice {
    pub id: i64,
    #[serde(rename = "titol")]
    pub title: String,
    #[serde(rename = "codi_assig")]
    pub subject_code: String,
    #[serde(rename = "text")]
    pub body_html: String,
    #[serde(rename = "data_insercio")]
    pub created_at: TimeDate,
    #[serde(rename = "data_modificacio")]
    pub modified_at: TimeDate,
    #[serde(rename = "data_caducitat")]
    pub expires_at: TimeDate,
    #[serde(rename = "adjunts")]
    pub attachments: Vec<Attachment>,
}

impl Notice {
    /// The instant a notice became visible in its current form: the later of
    /// creation and modification.
    pub fn published_at(&self) -> TimeDate {
        if self.modified_at < self.created_at {
            self.created_at
        } else {
            self.modified_at
        }
    }

    /// Banner notices (elections, enrollment periods, ...) carry a `#`-prefixed
    /// pseudo subject code and are not viewable on the per-subject page.
    pub fn is_banner(&self) -> bool {
        self.subject_code.starts_with('#')
    }
}

/// A file attached to a notice.
#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(rename = "nom")]
    pub name: String,
    pub url: String,
    #[serde(rename = "tipus_mime")]
    pub mime_type: String,
    #[serde(rename = "mida")]
    pub size: u64,
    #[serde(rename = "data_modificacio")]
    pub modified_at: TimeDate,
}

impl Attachment {
    /// The login-wrapped URL of the attachment. The raw URL requires session
    /// cookies that expire, so links always go through the login redirect.
    pub fn redirect_url(&self) -> String {
        let encoded: String = form_urlencoded::byte_serialize(self.url.as_bytes()).collect();
        format!("{LOGIN_REDIRECT_BASE_URL}{encoded}")
    }
}

#[derive(Debug, Deserialize)]
struct NoticesResponse {
    #[allow(dead_code)]
    count: u32,
    results: Vec<Notice>,
}

/// A subject from the public API, used to build per-subject notice links.
#[derive(Debug, Clone, Deserialize)]
pub struct PublicSubject {
    #[serde(rename = "sigles")]
    pub acronym: String,
    #[serde(rename = "codi_upc")]
    pub upc_code: i64,
    #[serde(rename = "nom", default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: String,
}

const RESOURCE_NOT_FOUND_DETAIL: &str = "Not found.";

/// The upstream notice source, as seen by the push job and command handlers.
#[async_trait]
pub trait NoticeSource: Send + Sync {
    /// Fetches the subscriber's full notice list together with a fixed-width
    /// hex CRC32 digest of the raw response bytes.
    async fn fetch_notices(&self, subscriber: &Subscriber) -> Result<(Vec<Notice>, String), Error>;

    /// Looks up a subject on the public API by its acronym.
    async fn public_subject(&self, acronym: &str) -> Result<PublicSubject, Error>;
}

/// Real FIB API client. One instance is shared by all subscribers; requests
/// are made serially, reusing the underlying connection.
#[derive(Debug, Clone)]
pub struct FibApi {
    http: Client,
    public_client_id: String,
}

impl FibApi {
    pub fn new(public_client_id: String) -> Self {
        let http = Client::builder()
            .user_agent("raco-notify/0.1")
            .timeout(CLIENT_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            public_client_id,
        }
    }

    async fn get_raw(&self, url: &str, bearer: Option<&str>) -> Result<Vec<u8>, Error> {
        let mut req = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .header("Accept", "application/json");
        req = match bearer {
            Some(token) => req.bearer_auth(token),
            None => req.header("client_id", &self.public_client_id),
        };
        let res = req.send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        if status == StatusCode::OK {
            return Ok(body.to_vec());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            // token has been revoked or has expired on server
            return Err(Error::AuthorizationExpired);
        }
        if status == StatusCode::NOT_FOUND {
            if let Ok(parsed) = serde_json::from_slice::<ErrorResponse>(&body) {
                if parsed.detail == RESOURCE_NOT_FOUND_DETAIL {
                    return Err(Error::ResourceNotFound);
                }
            }
        }
        Err(Error::BadResponse {
            status,
            detail: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

#[async_trait]
impl NoticeSource for FibApi {
    async fn fetch_notices(&self, subscriber: &Subscriber) -> Result<(Vec<Notice>, String), Error> {
        let body = self
            .get_raw(NOTICES_URL, Some(&subscriber.access_token))
            .await?;
        let digest = response_digest(&body);
        let parsed: NoticesResponse = serde_json::from_slice(&body)?;
        Ok((parsed.results, digest))
    }

    async fn public_subject(&self, acronym: &str) -> Result<PublicSubject, Error> {
        let url = PUBLIC_SUBJECT_URL_TEMPLATE.replace("{}", acronym);
        let body = self.get_raw(&url, None).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Fixed-width hex CRC32 of a raw response body. Non-cryptographic on purpose;
/// it only needs to answer "did the bytes change since last run".
pub fn response_digest(body: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice_from_json(raw: &str) -> Notice {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn published_at_is_max_of_created_and_modified() {
        let n = notice_from_json(
            r#"{"id": 1, "titol": "t", "codi_assig": "SI", "text": "",
                "data_insercio": "2022-07-05T09:25:50",
                "data_modificacio": "2022-07-05T00:00:00",
                "data_caducitat": "2022-07-15T00:00:00", "adjunts": []}"#,
        );
        assert_eq!(n.published_at(), n.created_at);

        let n = notice_from_json(
            r#"{"id": 2, "titol": "t", "codi_assig": "SI", "text": "",
                "data_insercio": "2022-02-12T00:00:00",
                "data_modificacio": "2022-02-12T10:56:41",
                "data_caducitat": "2022-07-20T00:00:00", "adjunts": []}"#,
        );
        assert_eq!(n.published_at(), n.modified_at);
    }

    #[test]
    fn banner_notices_are_detected() {
        let n = notice_from_json(
            r##"{"id": 3, "titol": "t", "codi_assig": "#PREMAT-GEI", "text": "",
                "data_insercio": "2022-07-05T09:25:50",
                "data_modificacio": "2022-07-05T09:25:50",
                "data_caducitat": "2022-07-15T00:00:00", "adjunts": []}"##,
        );
        assert!(n.is_banner());
    }

    #[test]
    fn attachment_redirect_url_wraps_login() {
        let a: Attachment = serde_json::from_str(
            r#"{"tipus_mime": "application/pdf", "nom": "a.pdf",
                "url": "https://api.fib.upc.edu/v2/jo/avisos/adjunt/96611",
                "data_modificacio": "2022-02-12T04:24:35", "mida": 66670}"#,
        )
        .unwrap();
        assert_eq!(
            a.redirect_url(),
            "https://api.fib.upc.edu/v2/accounts/login/?next=https%3A%2F%2Fapi.fib.upc.edu%2Fv2%2Fjo%2Favisos%2Fadjunt%2F96611"
        );
    }

    #[test]
    fn digest_is_fixed_width_hex() {
        let d = response_digest(b"[]");
        assert_eq!(d.len(), 8);
        assert_eq!(d, response_digest(b"[]"));
        assert_ne!(d, response_digest(b"[{}]"));
    }

    #[test]
    fn timestamps_parse_in_madrid_time() {
        let t: TimeDate = serde_json::from_str(r#""2022-02-12T10:56:41""#).unwrap();
        assert_eq!(t.0.format("%d/%m/%Y %H:%M:%S").to_string(), "12/02/2022 10:56:41");
    }
}
