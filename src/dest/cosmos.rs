use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde_json::json;
use sha2::Sha256;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::config::{ConfigError, DestinationSettings};
use crate::dest::{GraphStore, GremlinClient, ResultPages};
use crate::error::{MigrateError, Result};
use crate::model::Statement;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2018-12-31";

/// Formats `at` the way the `x-ms-date` header expects it.
pub fn http_date(at: OffsetDateTime) -> Result<String> {
    let rfc1123 = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.format(rfc1123)
        .map_err(|err| MigrateError::Transport(format!("cannot format request date: {err}")))
}

/// Provisioning client for the Cosmos DB SQL REST API, authenticated with the
/// account master key.
pub struct CosmosRest {
    client: Client,
    endpoint: String,
    key: Hmac<Sha256>,
    database: String,
    collection: String,
}

impl CosmosRest {
    /// Client for the database and collection named in `settings`.
    pub fn new(settings: &DestinationSettings) -> Result<Self> {
        let invalid_key = |reason: String| ConfigError::Invalid {
            field: "destination.auth_key",
            reason,
        };
        let key_bytes = BASE64
            .decode(settings.auth_key.trim())
            .map_err(|err| invalid_key(format!("not base64: {err}")))?;
        let key = Hmac::<Sha256>::new_from_slice(&key_bytes)
            .map_err(|err| invalid_key(err.to_string()))?;
        let client = Client::builder()
            .build()
            .map_err(|err| MigrateError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            key,
            database: settings.database.clone(),
            collection: settings.collection.clone(),
        })
    }

    fn database_link(&self) -> String {
        format!("dbs/{}", self.database)
    }

    fn collection_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.collection)
    }

    /// Master-key authorization header value for one request.
    pub fn authorization(
        &self,
        verb: &Method,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> String {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.as_str().to_lowercase(),
            resource_type.to_lowercase(),
            resource_link,
            date.to_lowercase()
        );
        let mut mac = self.key.clone();
        mac.update(payload.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        urlencoding::encode(&format!("type=master&ver=1.0&sig={signature}")).into_owned()
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        resource_type: &str,
        resource_link: &str,
        body: Option<serde_json::Value>,
        throughput: Option<u32>,
    ) -> Result<(StatusCode, String)> {
        let date = http_date(OffsetDateTime::now_utc())?;
        let url = format!("{}/{path}", self.endpoint);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header(
                "authorization",
                self.authorization(&method, resource_type, resource_link, &date),
            );
        if let Some(throughput) = throughput {
            request = request.header("x-ms-offer-throughput", throughput.to_string());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| MigrateError::Transport(format!("{method} {url}: {err}")))?;
        let status = response.status();
        let text = response.text().await.map_err(|err| {
            MigrateError::Transport(format!("{method} {url}: reading response body: {err}"))
        })?;
        debug!(%method, path, status = status.as_u16(), "dest.rest.response");
        Ok((status, text))
    }

    /// Creates the database; an existing one is left alone.
    pub async fn create_database_if_not_exists(&self) -> Result<()> {
        let (status, body) = self
            .send(
                Method::POST,
                "dbs",
                "dbs",
                "",
                Some(json!({ "id": self.database })),
                None,
            )
            .await?;
        match status {
            StatusCode::CREATED => {
                info!(database = %self.database, "dest.database.created");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            other => Err(provisioning(self.database_link(), other, body)),
        }
    }

    /// Deletes the collection, reporting [`MigrateError::NotFound`] when absent.
    pub async fn delete_collection(&self) -> Result<()> {
        let link = self.collection_link();
        let (status, body) = self
            .send(Method::DELETE, &link, "colls", &link, None, None)
            .await?;
        match status {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(MigrateError::NotFound(link)),
            other => Err(provisioning(link, other, body)),
        }
    }

    /// Creates the collection with `throughput` request units per second.
    pub async fn create_collection(&self, throughput: u32) -> Result<()> {
        let database = self.database_link();
        let path = format!("{database}/colls");
        let (status, body) = self
            .send(
                Method::POST,
                &path,
                "colls",
                &database,
                Some(json!({ "id": self.collection })),
                Some(throughput),
            )
            .await?;
        match status {
            StatusCode::CREATED => Ok(()),
            other => Err(provisioning(self.collection_link(), other, body)),
        }
    }
}

fn provisioning(resource: String, status: StatusCode, body: String) -> MigrateError {
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body
    };
    MigrateError::Provisioning {
        resource,
        status: status.as_u16(),
        message,
    }
}

/// Production destination: REST provisioning plus Gremlin statement execution
/// against the same account.
pub struct CosmosStore {
    rest: CosmosRest,
    gremlin: GremlinClient,
}

impl CosmosStore {
    /// Prepares clients for `settings` with one Gremlin connection per worker.
    /// Nothing is dialled until the first request.
    pub fn connect(settings: &DestinationSettings, workers: usize) -> Result<Self> {
        Ok(Self {
            rest: CosmosRest::new(settings)?,
            gremlin: GremlinClient::new(
                &settings.gremlin_endpoint,
                &settings.database,
                &settings.collection,
                &settings.auth_key,
                workers,
            ),
        })
    }
}

#[async_trait]
impl GraphStore for CosmosStore {
    async fn ensure_database(&self) -> Result<()> {
        self.rest.create_database_if_not_exists().await
    }

    async fn delete_collection(&self) -> Result<()> {
        self.rest.delete_collection().await
    }

    async fn create_collection(&self, throughput: u32) -> Result<()> {
        self.rest.create_collection(throughput).await
    }

    async fn submit(&self, statement: &Statement) -> Result<Box<dyn ResultPages>> {
        self.gremlin.submit(statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, Uri};
    use axum::Router;
    use parking_lot::Mutex;
    use time::macros::datetime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::config::MigrationConfig;
    use crate::migrate::Migrator;
    use crate::source::{GraphSnapshot, SnapshotSource};

    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        method: String,
        path: String,
        throughput: Option<String>,
        signed: bool,
    }

    struct Account {
        create_database: StatusCode,
        delete_collection: StatusCode,
        create_collection: StatusCode,
        seen: Mutex<Vec<Seen>>,
    }

    impl Account {
        fn new(create_database: u16, delete_collection: u16, create_collection: u16) -> Arc<Self> {
            let status = |code| StatusCode::from_u16(code).unwrap();
            Arc::new(Self {
                create_database: status(create_database),
                delete_collection: status(delete_collection),
                create_collection: status(create_collection),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    async fn respond(
        State(account): State<Arc<Account>>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
    ) -> (StatusCode, String) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        account.seen.lock().push(Seen {
            method: method.to_string(),
            path: uri.path().to_string(),
            throughput: header("x-ms-offer-throughput"),
            signed: header("authorization").is_some() && header("x-ms-date").is_some(),
        });
        let status = match (method.as_str(), uri.path()) {
            ("POST", "/dbs") => account.create_database,
            ("DELETE", "/dbs/graphdb/colls/Northwind") => account.delete_collection,
            ("POST", "/dbs/graphdb/colls") => account.create_collection,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = if status.is_success() {
            String::new()
        } else {
            format!("{{\"code\":\"{}\"}}", status.as_u16())
        };
        (status, body)
    }

    /// Serves `account` on a local port and returns settings pointing at it.
    async fn serve(account: Arc<Account>) -> DestinationSettings {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());
        let app = Router::new().fallback(respond).with_state(account);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        DestinationSettings {
            endpoint,
            ..settings("c2VjcmV0LWtleQ==")
        }
    }

    fn settings(auth_key: &str) -> DestinationSettings {
        DestinationSettings {
            endpoint: "https://acct.documents.azure.com:443/".into(),
            auth_key: auth_key.into(),
            gremlin_endpoint: "wss://acct.gremlin.cosmos.azure.com:443/".into(),
            database: "graphdb".into(),
            collection: "Northwind".into(),
        }
    }

    #[test]
    fn dates_use_rfc1123() {
        let date = http_date(datetime!(1994-11-01 08:12:31 UTC)).unwrap();
        assert_eq!(date, "Tue, 01 Nov 1994 08:12:31 GMT");
    }

    #[test]
    fn authorization_is_url_encoded_master_token() {
        let rest = CosmosRest::new(&settings("c2VjcmV0LWtleQ==")).unwrap();
        let token = rest.authorization(
            &Method::DELETE,
            "colls",
            "dbs/graphdb/colls/Northwind",
            "Tue, 01 Nov 1994 08:12:31 GMT",
        );
        assert!(token.starts_with("type%3Dmaster%26ver%3D1.0%26sig%3D"));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));

        let again = rest.authorization(
            &Method::DELETE,
            "colls",
            "dbs/graphdb/colls/Northwind",
            "Tue, 01 Nov 1994 08:12:31 GMT",
        );
        assert_eq!(token, again);
        let other = rest.authorization(
            &Method::POST,
            "colls",
            "dbs/graphdb",
            "Tue, 01 Nov 1994 08:12:31 GMT",
        );
        assert_ne!(token, other);
    }

    #[test]
    fn links_and_endpoint_are_normalized() {
        let rest = CosmosRest::new(&settings("a2V5")).unwrap();
        assert_eq!(rest.endpoint, "https://acct.documents.azure.com:443");
        assert_eq!(rest.database_link(), "dbs/graphdb");
        assert_eq!(rest.collection_link(), "dbs/graphdb/colls/Northwind");
    }

    #[test]
    fn keys_must_be_base64() {
        assert!(matches!(
            CosmosRest::new(&settings("not base64!")),
            Err(MigrateError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn provisioning_errors_fall_back_to_reason_phrase() {
        let err = provisioning("dbs/graphdb".into(), StatusCode::FORBIDDEN, String::new());
        assert!(matches!(
            err,
            MigrateError::Provisioning { status: 403, ref message, .. } if message == "Forbidden"
        ));
    }

    #[tokio::test]
    async fn existing_databases_are_accepted() {
        for code in [201, 409] {
            let account = Account::new(code, 204, 201);
            let rest = CosmosRest::new(&serve(Arc::clone(&account)).await).unwrap();
            rest.create_database_if_not_exists().await.unwrap();
            let seen = account.seen.lock();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].method, "POST");
            assert!(seen[0].signed);
        }

        let account = Account::new(403, 204, 201);
        let rest = CosmosRest::new(&serve(account).await).unwrap();
        assert!(matches!(
            rest.create_database_if_not_exists().await,
            Err(MigrateError::Provisioning { status: 403, ref resource, .. }) if resource == "dbs/graphdb"
        ));
    }

    #[tokio::test]
    async fn missing_collections_report_not_found() {
        let account = Account::new(201, 404, 201);
        let rest = CosmosRest::new(&serve(account).await).unwrap();
        assert!(matches!(
            rest.delete_collection().await,
            Err(MigrateError::NotFound(ref link)) if link == "dbs/graphdb/colls/Northwind"
        ));

        let account = Account::new(201, 500, 201);
        let rest = CosmosRest::new(&serve(account).await).unwrap();
        assert!(matches!(
            rest.delete_collection().await,
            Err(MigrateError::Provisioning { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn collections_are_created_with_the_requested_throughput() {
        let account = Account::new(201, 204, 201);
        let rest = CosmosRest::new(&serve(Arc::clone(&account)).await).unwrap();
        rest.create_collection(1000).await.unwrap();
        assert_eq!(
            account.seen.lock()[0],
            Seen {
                method: "POST".into(),
                path: "/dbs/graphdb/colls".into(),
                throughput: Some("1000".into()),
                signed: true,
            }
        );

        let account = Account::new(201, 204, 409);
        let rest = CosmosRest::new(&serve(account).await).unwrap();
        let err = rest.create_collection(400).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Provisioning { status: 409, ref message, .. } if message.contains("409")
        ));
    }

    #[tokio::test]
    async fn reset_absorbs_an_absent_collection() {
        let account = Account::new(201, 404, 201);
        let settings = serve(Arc::clone(&account)).await;
        let store = CosmosStore::connect(&settings, 1).unwrap();
        let config = MigrationConfig::default();
        let migrator = Migrator::new(
            &config,
            Arc::new(SnapshotSource::new(GraphSnapshot::default())),
            Arc::new(store),
        );
        migrator.reset_destination().await.unwrap();

        let seen: Vec<(String, String)> = account
            .seen
            .lock()
            .iter()
            .map(|s| (s.method.clone(), s.path.clone()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("DELETE".into(), "/dbs/graphdb/colls/Northwind".into()),
                ("POST".into(), "/dbs/graphdb/colls".into()),
            ]
        );
    }

    #[tokio::test]
    async fn truncated_bodies_are_transport_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 64\r\n\r\n{")
                .await
                .unwrap();
            stream.shutdown().await.unwrap();
        });
        let rest = CosmosRest::new(&DestinationSettings {
            endpoint,
            ..settings("c2VjcmV0LWtleQ==")
        })
        .unwrap();
        let err = rest.delete_collection().await.unwrap_err();
        assert!(
            matches!(err, MigrateError::Transport(ref msg) if msg.contains("reading response body")),
            "unexpected error: {err}"
        );
    }
}
