//! HTTP handlers for the directory listings and file downloads.
//!
//! Each handler resolves its path segments, validates the query, asks the
//! upstream client for entities, narrows and orders them, then renders.

use crate::{
    config::AppConfig,
    errors::AppError,
    models::{
        container::{Container, File},
        listing::{ListingPage, ListingRow},
        source::Source,
    },
    render::html::{encode_segment, render_listing},
    services::{
        filter::CompiledFilter,
        sort::{SortColumn, SortOrder, SortSpec, select},
        upstream_service::UpstreamError,
    },
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{debug, error};

/// Raw listing query. Every field stays a string so that malformed values
/// turn into a readable 400 instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    pub key: Option<String>,
    pub filter: Option<String>,
    pub flags: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "C")]
    pub column: Option<String>,
    #[serde(rename = "O")]
    pub order: Option<String>,
}

/// A validated listing request.
#[derive(Debug)]
pub struct ListingParams {
    pub key: String,
    pub filter: CompiledFilter,
    pub sort: SortSpec,
    pub limit: usize,
    /// Parameters every link on the page repeats (sort is added by the renderer).
    pub carried: Vec<(&'static str, String)>,
}

impl ListingQuery {
    pub fn access_key(&self) -> Result<String, AppError> {
        self.key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("missing access key, add ?key=YOUR_API_KEY"))
    }

    pub fn validate(&self, config: &AppConfig) -> Result<ListingParams, AppError> {
        let key = self.access_key()?;
        let limit = parse_limit(self.limit.as_deref(), config.max_results)?;

        let pattern = self.filter.as_deref().unwrap_or_default();
        let flags = self.flags.as_deref().unwrap_or_default().trim();
        let filter = CompiledFilter::compile(config.filter_mode, pattern, flags)?;

        let sort = SortSpec {
            column: self
                .column
                .as_deref()
                .and_then(SortColumn::from_code)
                .unwrap_or_default(),
            order: self
                .order
                .as_deref()
                .and_then(SortOrder::from_code)
                .unwrap_or_default(),
        };

        let mut carried = vec![("key", key.clone())];
        if !pattern.trim().is_empty() {
            carried.push(("filter", pattern.to_string()));
        }
        if !flags.is_empty() {
            carried.push(("flags", flags.to_string()));
        }
        if limit != config.max_results {
            carried.push(("limit", limit.to_string()));
        }

        Ok(ListingParams {
            key,
            filter,
            sort,
            limit,
            carried,
        })
    }
}

/// `limit` must be a positive integer; anything above `max` clamps to it.
fn parse_limit(raw: Option<&str>, max: usize) -> Result<usize, AppError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(max),
        Some(raw) => raw,
    };
    let invalid = || AppError::bad_request(format!("limit must be between 1 and {max}"));
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match raw.parse::<usize>() {
        Ok(0) => Err(invalid()),
        Ok(limit) => Ok(limit.min(max)),
        // All digits but too large for usize.
        Err(_) => Ok(max),
    }
}

fn parse_source(segment: &str) -> Result<Source, AppError> {
    segment
        .parse::<Source>()
        .map_err(|_| AppError::not_found(format!("unknown source `{segment}`")))
}

/// Ids are positive decimal integers; anything else is a missing page.
fn parse_id(segment: &str) -> Result<u64, AppError> {
    Some(segment)
        .filter(|raw| !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::not_found("no such entry"))
}

fn upstream_failure(err: UpstreamError) -> AppError {
    error!(provider = %err.provider(), error = %err, "upstream failure");
    AppError::from(err)
}

fn describe_files(count: usize) -> String {
    if count == 1 {
        "1 file".to_string()
    } else {
        format!("{count} files")
    }
}

fn container_row(container: &Container, with_source: bool) -> ListingRow {
    let files = describe_files(container.files.len());
    ListingRow {
        href: Some(format!(
            "/{}/{}/",
            container.source, container.container_id
        )),
        name: format!("{}/", container.container_name),
        size: Some(container.total_size()),
        description: Some(if with_source {
            format!("{}, {}", container.source, files)
        } else {
            files
        }),
    }
}

fn file_row(file: &File) -> ListingRow {
    ListingRow {
        href: Some(format!(
            "/{}/{}/{}/{}",
            file.source,
            file.container_id,
            file.file_id,
            encode_segment(&file.display_name)
        )),
        name: file.display_name.clone(),
        size: Some(file.size),
        description: (file.full_name != file.display_name).then(|| file.full_name.clone()),
    }
}

impl ListingParams {
    fn page(
        &self,
        path: String,
        parent: Option<String>,
        rows: Vec<ListingRow>,
        total_matched: usize,
        errors: Vec<String>,
    ) -> ListingPage {
        ListingPage {
            path,
            parent,
            rows,
            total_matched,
            filter_description: self.filter.describe(),
            errors,
            sort: self.sort,
            carried_query: self.carried.clone(),
        }
    }
}

/// `GET /`: every source, fetched concurrently.
///
/// Fails only when every source failed; otherwise failed sources are
/// listed as annotations above the table.
pub async fn list_root(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Html<String>, AppError> {
    let params = query.validate(&state.config)?;
    let fan_out = state.upstream.list_all(&params.key).await;

    if fan_out.all_failed() {
        let reasons: Vec<String> = fan_out
            .failures
            .iter()
            .map(|(_, err)| err.summary())
            .collect();
        error!(failures = fan_out.failures.len(), "every source failed");
        return Err(AppError::bad_gateway(format!(
            "every source failed: {}",
            reasons.join("; ")
        )));
    }

    let selection = select(
        fan_out.containers(),
        |container| params.filter.matches_container(container),
        params.sort,
        params.limit,
    );
    debug!(total = selection.total, shown = selection.items.len(), "root listing");

    let rows = selection
        .items
        .iter()
        .map(|container| container_row(container, true))
        .collect();
    let errors = fan_out
        .failures
        .iter()
        .map(|(_, err)| err.summary())
        .collect();

    let page = params.page("/".to_string(), None, rows, selection.total, errors);
    Ok(Html(render_listing(&page)))
}

/// `GET /{source}/`
pub async fn list_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(query): Query<ListingQuery>,
) -> Result<Html<String>, AppError> {
    let provider = parse_source(&source)?;
    let params = query.validate(&state.config)?;

    let containers = state
        .upstream
        .list_by_source(provider, &params.key)
        .await
        .map_err(upstream_failure)?;

    let selection = select(
        containers.iter(),
        |container| params.filter.matches_container(container),
        params.sort,
        params.limit,
    );
    let rows = selection
        .items
        .iter()
        .map(|container| container_row(container, false))
        .collect();

    let page = params.page(
        format!("/{provider}/"),
        Some("/".to_string()),
        rows,
        selection.total,
        Vec::new(),
    );
    Ok(Html(render_listing(&page)))
}

/// `GET /{source}/{id}/`: the files of one container.
///
/// A container whose own name matches the filter shows all of its files.
pub async fn list_container(
    State(state): State<AppState>,
    Path((source, id)): Path<(String, String)>,
    Query(query): Query<ListingQuery>,
) -> Result<Html<String>, AppError> {
    let provider = parse_source(&source)?;
    let container_id = parse_id(&id)?;
    let params = query.validate(&state.config)?;

    let container = state
        .upstream
        .get_by_id(provider, &params.key, container_id)
        .await
        .map_err(upstream_failure)?
        .ok_or_else(|| AppError::not_found("no such container"))?;

    let show_all = params.filter.matches_container_name(&container);
    let selection = select(
        container.files.iter(),
        |file| show_all || params.filter.matches_file(file),
        params.sort,
        params.limit,
    );
    let rows = selection.items.iter().map(|file| file_row(file)).collect();

    let page = params.page(
        format!("/{provider}/{container_id}/"),
        Some(format!("/{provider}/")),
        rows,
        selection.total,
        Vec::new(),
    );
    Ok(Html(render_listing(&page)))
}

/// Segments of a download path. A trailing file name, if any, is cosmetic.
#[derive(Debug, Deserialize)]
pub struct DownloadPath {
    pub source: String,
    pub id: String,
    pub file_id: String,
}

/// `GET /{source}/{id}/{file_id}[/{name}]`: 302 to a fresh download link.
///
/// The file must exist in the container before a link is requested.
pub async fn download_file(
    State(state): State<AppState>,
    Path(segments): Path<DownloadPath>,
    Query(query): Query<ListingQuery>,
) -> Result<Response, AppError> {
    let provider = parse_source(&segments.source)?;
    let container_id = parse_id(&segments.id)?;
    let file_id = parse_id(&segments.file_id)?;
    let key = query.access_key()?;

    let container = state
        .upstream
        .get_by_id(provider, &key, container_id)
        .await
        .map_err(upstream_failure)?
        .ok_or_else(|| AppError::not_found("no such container"))?;
    if container.file(file_id).is_none() {
        return Err(AppError::not_found("no such file"));
    }

    let url = state
        .upstream
        .download_url(provider, &key, container_id, file_id)
        .await
        .map_err(upstream_failure)?;
    debug!(%provider, container_id, file_id, "issuing download redirect");

    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

fn slash_redirect(uri: &Uri) -> Redirect {
    let target = format!("{}/", uri.path());
    let target = match uri.query() {
        Some(query) => format!("{target}?{query}"),
        None => target,
    };
    Redirect::permanent(&target)
}

/// `GET /{source}`: directories always end in a slash.
pub async fn redirect_source(Path(source): Path<String>, uri: Uri) -> Result<Redirect, AppError> {
    parse_source(&source)?;
    Ok(slash_redirect(&uri))
}

/// `GET /{source}/{id}`
pub async fn redirect_container(
    Path((source, id)): Path<(String, String)>,
    uri: Uri,
) -> Result<Redirect, AppError> {
    parse_source(&source)?;
    parse_id(&id)?;
    Ok(slash_redirect(&uri))
}

/// Fallback for every path no route claims.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("{} was not found on this server", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::filter::FilterMode;
    use rstest::rstest;

    fn config() -> AppConfig {
        AppConfig {
            max_results: 100,
            ..AppConfig::default()
        }
    }

    fn query(pairs: &[(&str, &str)]) -> ListingQuery {
        let mut query = ListingQuery::default();
        for (name, value) in pairs {
            let value = Some(value.to_string());
            match *name {
                "key" => query.key = value,
                "filter" => query.filter = value,
                "flags" => query.flags = value,
                "limit" => query.limit = value,
                "C" => query.column = value,
                "O" => query.order = value,
                other => panic!("unexpected parameter {other}"),
            }
        }
        query
    }

    #[rstest]
    #[case(None, 100)]
    #[case(Some(""), 100)]
    #[case(Some("1"), 1)]
    #[case(Some("42"), 42)]
    #[case(Some("100"), 100)]
    #[case(Some("5000"), 100)]
    #[case(Some("99999999999999999999999999"), 100)]
    fn limit_defaults_and_clamps(#[case] raw: Option<&str>, #[case] expected: usize) {
        assert_eq!(parse_limit(raw, 100).unwrap(), expected);
    }

    #[rstest]
    #[case("0")]
    #[case("000")]
    #[case("-3")]
    #[case("+3")]
    #[case("ten")]
    #[case("1.5")]
    fn bad_limits_are_rejected(#[case] raw: &str) {
        let err = parse_limit(Some(raw), 100).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[rstest]
    #[case("0")]
    #[case("-1")]
    #[case("abc")]
    #[case("")]
    #[case("1e3")]
    fn malformed_ids_are_not_found(#[case] raw: &str) {
        assert_eq!(parse_id(raw).unwrap_err().status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_sources_are_not_found() {
        assert_eq!(parse_source("torrents").unwrap(), Source::Torrents);
        assert_eq!(parse_source("ftp").unwrap_err().status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn missing_or_blank_key_is_a_bad_request() {
        let cfg = config();
        for q in [query(&[]), query(&[("key", "  ")])] {
            assert_eq!(q.validate(&cfg).unwrap_err().status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn invalid_filter_is_a_bad_request() {
        let cfg = AppConfig {
            filter_mode: FilterMode::Pattern,
            ..config()
        };
        let err = query(&[("key", "k"), ("filter", "(unclosed")])
            .validate(&cfg)
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn carried_query_repeats_only_what_was_set() {
        let params = query(&[("key", "k"), ("filter", "mkv"), ("limit", "5"), ("C", "S")])
            .validate(&config())
            .unwrap();
        assert_eq!(
            params.carried,
            vec![
                ("key", "k".to_string()),
                ("filter", "mkv".to_string()),
                ("limit", "5".to_string()),
            ]
        );
        assert_eq!(params.sort.column, SortColumn::Size);
        assert_eq!(params.sort.order, SortOrder::Ascending);
        assert_eq!(params.limit, 5);
    }

    #[test]
    fn unknown_sort_codes_fall_back_to_name_ascending() {
        let params = query(&[("key", "k"), ("C", "X"), ("O", "sideways")])
            .validate(&config())
            .unwrap();
        assert_eq!(params.sort, SortSpec::default());
    }

    #[test]
    fn file_rows_link_by_id_and_encode_the_name() {
        let file = File {
            source: Source::WebDl,
            container_id: 3,
            file_id: 7,
            full_name: "dir/My Movie.mkv".to_string(),
            display_name: "My Movie.mkv".to_string(),
            size: 10,
        };
        let row = file_row(&file);
        assert_eq!(row.href.as_deref(), Some("/webdl/3/7/My%20Movie.mkv"));
        assert_eq!(row.description.as_deref(), Some("dir/My Movie.mkv"));
    }

    #[test]
    fn slash_redirect_keeps_the_query() {
        let uri: Uri = "/torrents?key=abc&C=S".parse().unwrap();
        let response = slash_redirect(&uri).into_response();
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/torrents/?key=abc&C=S"
        );
    }
}
