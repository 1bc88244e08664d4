//! Integration tests for imagetool-registry.
//!
//! A local axum server plays the checksum repository, Keystone and Glance.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use imagetool_core::{
    ChecksumAlgorithm, Error, ImageRegistry, RotationEngine, RotationPolicy, SourceOpener,
    TransferEngine, UploadOptions,
};
use imagetool_registry::glance::JSON_PATCH_CONTENT_TYPE;
use imagetool_registry::{
    GlanceAuth, GlanceClient, GlanceConfig, HttpOpener, KeystoneCredentials, RegistryError,
    RepositoryDiscoverer, Session,
};
use regex::Regex;
use serde_json::{json, Map, Value};
use url::Url;

const TOKEN: &str = "tok-1";

#[derive(Default)]
struct Mock {
    base: String,
    images: Vec<Value>,
    data: HashMap<String, Vec<u8>>,
    calls: Vec<String>,
    patch_types: Vec<String>,
    next_id: usize,
    corrupt_download: bool,
}

type Shared = Arc<Mutex<Mock>>;

fn image_bytes(name: &str) -> Vec<u8> {
    format!("image data of {name}\n").repeat(1000).into_bytes()
}

fn last_modified(name: &str) -> Option<&'static str> {
    match name {
        "centos-1.qcow2" => Some("Wed, 01 Mar 2017 10:00:00 GMT"),
        "centos-2.qcow2" => Some("Thu, 01 Jun 2017 10:00:00 GMT"),
        "centos-2.raw" => Some("Fri, 01 Dec 2017 10:00:00 GMT"),
        _ => None,
    }
}

fn manifest() -> String {
    let sum = |name: &str| ChecksumAlgorithm::Sha256.digest(&image_bytes(name));
    format!(
        "{}  centos-1.qcow2\n{} *centos-2.qcow2\n{}  centos-2.raw\n\
         0123456789abcdef0123456789abcdef  missing.qcow2\ngarbage\n\n",
        sum("centos-1.qcow2"),
        sum("centos-2.qcow2"),
        sum("centos-2.raw"),
    )
}

fn seeded_image(id: &str, created_at: &str, group: &str) -> Value {
    json!({
        "id": id,
        "name": "CentOS 7",
        "status": "active",
        "visibility": "private",
        "created_at": created_at,
        "_image_group": group,
        "_orig_name": "CentOS 7",
    })
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-auth-token").and_then(|v| v.to_str().ok()) == Some(TOKEN)
}

async fn repo_file(Path(name): Path<String>) -> Response {
    if name == "sha256sum.txt" {
        return manifest().into_response();
    }
    Redirect::temporary(&format!("/mirror/{name}")).into_response()
}

async fn mirror_file(Path(name): Path<String>) -> Response {
    let Some(modified) = last_modified(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let data = image_bytes(&name);
    (
        [
            (LAST_MODIFIED, modified.to_string()),
            (CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response()
}

async fn issue_token(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let identity = &body["auth"]["identity"];
    if identity["methods"] != json!(["password"])
        || identity["password"]["user"]["password"] != "secret"
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let base = state.lock().unwrap().base.clone();
    let catalog = json!({
        "token": {
            "catalog": [{
                "type": "image",
                "endpoints": [
                    { "interface": "internal", "region": "RegionOne", "url": "http://glance.internal:9292/" },
                    { "interface": "public", "region": "RegionOne", "url": format!("{base}/v2/") },
                ]
            }]
        }
    });
    (StatusCode::CREATED, [("X-Subject-Token", TOKEN)], Json(catalog)).into_response()
}

async fn list_images(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let state = state.lock().unwrap();
    let limit: usize = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(20);
    let start = query
        .get("marker")
        .and_then(|m| state.images.iter().position(|i| i["id"] == m.as_str()))
        .map_or(0, |p| p + 1);
    let page: Vec<Value> = state.images.iter().skip(start).take(limit).cloned().collect();
    let next = page
        .last()
        .and_then(|i| i["id"].as_str())
        .filter(|_| start + limit < state.images.len())
        .map(|last| format!("/v2/images?marker={last}&limit={limit}"));
    let mut body = json!({ "images": page });
    if let Some(next) = next {
        body["next"] = json!(next);
    }
    Json(body).into_response()
}

async fn create_image(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = state.lock().unwrap();
    state.next_id += 1;
    let id = format!("img-{}", state.next_id);
    let mut image: Map<String, Value> = body.as_object().cloned().unwrap_or_default();
    image.insert("id".to_string(), json!(id));
    image.insert("status".to_string(), json!("queued"));
    image.insert(
        "created_at".to_string(),
        json!(format!("2018-01-01T00:00:{:02}Z", state.next_id)),
    );
    state.calls.push(format!("create {id}"));
    state.images.push(Value::Object(image.clone()));
    (StatusCode::CREATED, Json(Value::Object(image))).into_response()
}

fn find<'a>(images: &'a mut [Value], id: &str) -> Option<&'a mut Value> {
    images.iter_mut().find(|i| i["id"] == id)
}

async fn upload_data(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let mut state = state.lock().unwrap();
    let Some(image) = find(&mut state.images, &id) else {
        return StatusCode::NOT_FOUND;
    };
    image["status"] = json!("active");
    state.data.insert(id.clone(), body.to_vec());
    state.calls.push(format!("upload {id}"));
    StatusCode::NO_CONTENT
}

async fn download_data(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = state.lock().unwrap();
    let Some(mut data) = state.data.get(&id).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if state.corrupt_download {
        data.extend_from_slice(b"corrupted");
    }
    state.calls.push(format!("download {id}"));
    data.into_response()
}

async fn patch_image(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let Ok(ops) = serde_json::from_slice::<Vec<Value>>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut state = state.lock().unwrap();
    state.patch_types.push(content_type);
    state.calls.push(format!("update {id}"));
    let Some(image) = find(&mut state.images, &id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    for op in ops {
        let key = op["path"].as_str().unwrap_or_default().trim_start_matches('/');
        image[key] = op["value"].clone();
    }
    Json(image.clone()).into_response()
}

async fn deactivate_image(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let mut state = state.lock().unwrap();
    state.calls.push(format!("deactivate {id}"));
    match find(&mut state.images, &id) {
        Some(image) => {
            image["status"] = json!("deactivated");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn delete_image(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let mut state = state.lock().unwrap();
    state.calls.push(format!("delete {id}"));
    let before = state.images.len();
    state.images.retain(|i| i["id"] != id.as_str());
    state.data.remove(&id);
    if state.images.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn spawn(mock: Mock) -> (String, Shared) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");
    let state = Arc::new(Mutex::new(Mock {
        base: base.clone(),
        ..mock
    }));

    let app = Router::new()
        .route("/repo/:name", get(repo_file))
        .route("/mirror/:name", get(mirror_file))
        .route("/v3/auth/tokens", post(issue_token))
        .route("/v2/images", get(list_images).post(create_image))
        .route("/v2/images/:id", axum::routing::patch(patch_image).delete(delete_image))
        .route("/v2/images/:id/file", put(upload_data).get(download_data))
        .route("/v2/images/:id/actions/deactivate", post(deactivate_image))
        .with_state(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, state)
}

fn seeded() -> Mock {
    Mock {
        images: vec![
            seeded_image("old-1", "2017-01-01T00:00:00Z", "centos7"),
            seeded_image("foreign", "2017-01-15T00:00:00Z", "ubuntu"),
            seeded_image("old-2", "2017-02-01T00:00:00Z", "centos7"),
        ],
        ..Mock::default()
    }
}

fn credentials(base: &str) -> KeystoneCredentials {
    KeystoneCredentials::new(base)
        .with_password("admin", "secret")
        .with_project_name("images")
}

async fn connect(base: &str) -> GlanceClient {
    let config = GlanceConfig::new(GlanceAuth::Keystone(credentials(base)));
    GlanceClient::connect(&config).await.unwrap().with_page_size(2)
}

fn image_in<'a>(state: &'a Mock, id: &str) -> Option<&'a Value> {
    state.images.iter().find(|i| i["id"] == id)
}

#[tokio::test]
async fn test_discovery_picks_latest_match() {
    let (base, _) = spawn(Mock::default()).await;
    let manifest_url = Url::parse(&format!("{base}/repo/sha256sum.txt")).unwrap();
    let mut discoverer = RepositoryDiscoverer::new(manifest_url, reqwest::Client::new());

    let pattern = Regex::new(r"qcow2$").unwrap();
    let count = discoverer.refresh(Some(&pattern)).await.unwrap();
    assert_eq!(count, 3);
    assert!(discoverer.manifest().get("centos-2.raw").is_none());

    let latest = discoverer.latest(None).unwrap();
    assert_eq!(latest.name, "centos-2.qcow2");
    assert_eq!(latest.location.path(), "/mirror/centos-2.qcow2");
    assert_eq!(latest.size, Some(image_bytes("centos-2.qcow2").len() as u64));
    assert_eq!(
        latest.last_modified,
        Some(Utc.with_ymd_and_hms(2017, 6, 1, 10, 0, 0).unwrap())
    );
    assert_eq!(
        latest.checksum(),
        Some(ChecksumAlgorithm::Sha256.digest(&image_bytes("centos-2.qcow2")).as_str())
    );

    let missing = discoverer.manifest().get("missing.qcow2").unwrap();
    assert_eq!(missing.location.path(), "/repo/missing.qcow2");
    assert!(missing.last_modified.is_none());
    assert!(missing.size.is_none());
}

#[tokio::test]
async fn test_discovery_refresh_rebuilds_manifest() {
    let (base, _) = spawn(Mock::default()).await;
    let manifest_url = Url::parse(&format!("{base}/repo/sha256sum.txt")).unwrap();
    let mut discoverer = RepositoryDiscoverer::new(manifest_url, reqwest::Client::new());

    assert_eq!(discoverer.refresh(None).await.unwrap(), 4);
    assert_eq!(discoverer.latest(None).unwrap().name, "centos-2.raw");

    let pattern = Regex::new(r"^centos-1").unwrap();
    assert_eq!(discoverer.refresh(Some(&pattern)).await.unwrap(), 1);
    assert_eq!(discoverer.latest(None).unwrap().name, "centos-1.qcow2");
}

#[tokio::test]
async fn test_discovery_manifest_not_found() {
    let (base, _) = spawn(Mock::default()).await;
    let manifest_url = Url::parse(&format!("{base}/gone/sha256sum.txt")).unwrap();
    let mut discoverer = RepositoryDiscoverer::new(manifest_url, reqwest::Client::new());

    let err = discoverer.refresh(None).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamFetchFailure { status: 404, .. }));
    assert!(err.is_tool_error());
}

#[tokio::test]
async fn test_http_opener() {
    let (base, _) = spawn(Mock::default()).await;
    let opener = HttpOpener::new(reqwest::Client::new());

    let url = Url::parse(&format!("{base}/repo/centos-1.qcow2")).unwrap();
    let mut source = opener.open(&url).await.unwrap();
    let mut data = Vec::new();
    while let Some(chunk) = source.next_chunk().await.unwrap() {
        data.extend_from_slice(&chunk);
    }
    assert_eq!(data, image_bytes("centos-1.qcow2"));

    let url = Url::parse(&format!("{base}/mirror/absent.qcow2")).unwrap();
    let err = opener.open(&url).await.err().unwrap();
    assert!(matches!(err, Error::UpstreamFetchFailure { status: 404, .. }));
}

#[tokio::test]
async fn test_keystone_session() {
    let (base, _) = spawn(Mock::default()).await;
    let http = reqwest::Client::new();

    let config = GlanceConfig::new(GlanceAuth::Keystone(credentials(&base)));
    let session = Session::establish(&config, &http).await.unwrap();
    assert_eq!(session.token, TOKEN);
    assert_eq!(session.image_endpoint, format!("{base}/v2/"));

    let config = config.with_interface("internal");
    let session = Session::establish(&config, &http).await.unwrap();
    assert_eq!(session.image_endpoint, "http://glance.internal:9292/");

    let config = GlanceConfig::new(GlanceAuth::Keystone(credentials(&base)))
        .with_image_url("http://override.example.com:9292");
    let session = Session::establish(&config, &http).await.unwrap();
    assert_eq!(session.image_endpoint, "http://override.example.com:9292");
}

#[tokio::test]
async fn test_keystone_rejects_bad_password() {
    let (base, _) = spawn(Mock::default()).await;
    let credentials = KeystoneCredentials::new(&base).with_password("admin", "wrong");
    let config = GlanceConfig::new(GlanceAuth::Keystone(credentials));

    let err = GlanceClient::connect(&config).await.unwrap_err();
    assert!(matches!(err, RegistryError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn test_glance_wrong_token() {
    let (base, _) = spawn(seeded()).await;
    let client = GlanceClient::new(reqwest::Client::new(), &base, "stale");

    let err = client.list_images(&imagetool_core::ImageFilter::new()).await.unwrap_err();
    assert!(matches!(err, RegistryError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn test_glance_list_follows_pages() {
    let (base, _) = spawn(seeded()).await;
    let client = connect(&base).await;
    assert_eq!(client.endpoint(), base);

    let all = client.list(&imagetool_core::ImageFilter::new()).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["old-1", "foreign", "old-2"]);

    let group = client
        .list(&imagetool_core::ImageFilter::new().with_image_group("centos7"))
        .await
        .unwrap();
    let ids: Vec<&str> = group.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["old-1", "old-2"]);
}

#[tokio::test]
async fn test_upload_verify_and_rotate() {
    let (base, state) = spawn(seeded()).await;
    let client = connect(&base).await;
    let http = reqwest::Client::new();

    let manifest_url = Url::parse(&format!("{base}/repo/sha256sum.txt")).unwrap();
    let mut discoverer = RepositoryDiscoverer::new(manifest_url, http.clone());
    discoverer.refresh(Some(&Regex::new(r"qcow2$").unwrap())).await.unwrap();
    let image = discoverer.latest(None).unwrap().clone();

    let engine = TransferEngine::new(Arc::new(HttpOpener::new(http)))
        .with_progress(imagetool_core::ProgressMode::Disabled);
    let options = UploadOptions::new("CentOS 7")
        .with_verify(true)
        .with_image_group("centos7");
    let id = engine
        .download_to_registry(&client, &image, &options)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, "img-1");

    // Same checksum again: skipped.
    let again = engine.download_to_registry(&client, &image, &options).await.unwrap();
    assert!(again.is_none());

    let policy = RotationPolicy::new(1)
        .with_rotated_suffix("(OLD)")
        .with_deactivate(true);
    let now = Utc.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap();
    let report = RotationEngine::new()
        .rotate(&client, "centos7", &policy, now)
        .await
        .unwrap();
    assert_eq!(report.updated, 3);
    assert_eq!(report.deactivated, 1);
    assert_eq!(report.deleted, 0);

    let state = state.lock().unwrap();
    assert_eq!(
        state.calls,
        vec![
            "create img-1",
            "upload img-1",
            "download img-1",
            "update img-1",
            "update old-2",
            "update old-1",
            "deactivate old-1",
        ]
    );
    assert!(state.patch_types.iter().all(|t| t == JSON_PATCH_CONTENT_TYPE));

    let uploaded = image_in(&state, "img-1").unwrap();
    assert_eq!(uploaded["status"], "active");
    assert_eq!(uploaded["_is_latest"], "true");
    assert_eq!(uploaded["_orig_name"], "CentOS 7");
    assert_eq!(uploaded["_image_group"], "centos7");
    assert_eq!(uploaded["disk_format"], "qcow2");
    assert_eq!(uploaded["_checksum_sha256"], image.checksum().unwrap());
    assert_eq!(state.data["img-1"], image_bytes("centos-2.qcow2"));

    let rotated = image_in(&state, "old-2").unwrap();
    assert_eq!(rotated["name"], "CentOS 7 (OLD)");
    assert_eq!(rotated["_is_latest"], "false");
    assert_eq!(rotated["_rotated"], "2018-01-02T00:00:00Z");
    assert_eq!(rotated["status"], "active");

    let expired = image_in(&state, "old-1").unwrap();
    assert_eq!(expired["name"], "CentOS 7 (OLD)");
    assert_eq!(expired["status"], "deactivated");

    let foreign = image_in(&state, "foreign").unwrap();
    assert_eq!(foreign["name"], "CentOS 7");
    assert!(foreign.get("_is_latest").is_none());
}

#[tokio::test]
async fn test_second_rotation_is_noop() {
    let (base, state) = spawn(seeded()).await;
    let client = connect(&base).await;
    let policy = RotationPolicy::new(0)
        .with_latest_suffix("(latest)")
        .with_rotated_suffix("(OLD)")
        .with_delete(true);
    let now = Utc.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap();
    let engine = RotationEngine::new();

    let first = engine.rotate(&client, "centos7", &policy, now).await.unwrap();
    assert_eq!(first.updated, 1);
    assert_eq!(first.deleted, 1);

    let calls_after_first = state.lock().unwrap().calls.len();
    let second = engine.rotate(&client, "centos7", &policy, now).await.unwrap();
    assert_eq!(second.mutations(), 0);
    assert_eq!(state.lock().unwrap().calls.len(), calls_after_first);

    let state = state.lock().unwrap();
    assert!(image_in(&state, "old-1").is_none());
    assert_eq!(image_in(&state, "old-2").unwrap()["name"], "CentOS 7 (latest)");
}

#[tokio::test]
async fn test_verify_failure_deletes_upload() {
    let (base, state) = spawn(Mock {
        corrupt_download: true,
        ..seeded()
    })
    .await;
    let client = connect(&base).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("centos.qcow2");
    std::fs::write(&path, image_bytes("centos.qcow2")).unwrap();
    let image = imagetool_core::ImageDescriptor::from_file(&path).await.unwrap();

    let engine = TransferEngine::new(Arc::new(HttpOpener::new(reqwest::Client::new())))
        .with_progress(imagetool_core::ProgressMode::Disabled);
    let options = UploadOptions::new("CentOS 7").with_verify(true);
    let err = engine
        .download_to_registry(&client, &image, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VerifyMismatch { .. }));

    let state = state.lock().unwrap();
    assert!(image_in(&state, "img-1").is_none());
    assert_eq!(state.calls.last().map(String::as_str), Some("delete img-1"));
}

#[tokio::test]
async fn test_glance_missing_image() {
    let (base, _) = spawn(seeded()).await;
    let client = connect(&base).await;

    let err = client.deactivate_image("nope").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { id } if id == "nope"));

    let err = client.delete("nope").await.unwrap_err();
    assert!(!err.is_tool_error());
    assert_eq!(err.to_string(), "Image delete failed: Image not found: nope");
}
