//! `$top`/`$skip` pagination over list endpoints.
//!
//! Pages are streamed to a consumer as they arrive. A page shorter than the
//! page size ends the walk; a page of exactly the page size always triggers
//! one more request, even if that request turns out empty.

use std::sync::mpsc::SyncSender;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::http::{ApiClient, ApiError, Params};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const TOP_PARAM: &str = "$top";
pub const SKIP_PARAM: &str = "$skip";

/// Response envelope shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub value: Option<Vec<Value>>,
    /// Comment listings nest their items here instead of under `value`.
    #[serde(default)]
    pub comments: Option<Vec<Value>>,
}

impl Page {
    fn take_items(&mut self) -> Option<Vec<Value>> {
        match self.value.take() {
            Some(items) if !items.is_empty() => Some(items),
            _ => self.comments.take().filter(|items| !items.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page_size: usize,
    pub page_index: usize,
}

impl PageCursor {
    /// Resolves the page size from `$top`, writing the default back when the
    /// caller left it unset or unusable.
    pub fn from_params(params: &mut Params) -> Self {
        let page_size = params
            .get(TOP_PARAM)
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or_else(|| {
                params.set(TOP_PARAM, DEFAULT_PAGE_SIZE);
                DEFAULT_PAGE_SIZE
            });
        Self {
            page_size,
            page_index: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.page_size * self.page_index
    }

    pub fn is_last(&self, received: usize) -> bool {
        received < self.page_size
    }

    pub fn advance(&mut self) {
        self.page_index += 1;
    }
}

impl ApiClient {
    /// Walks every page of `endpoint`, handing each non-empty page to `sink`
    /// in order. Stops on the first transport, decode, shape or sink error.
    pub fn paginate<F>(&self, endpoint: &str, mut params: Params, mut sink: F) -> Result<(), ApiError>
    where
        F: FnMut(Vec<Value>) -> Result<(), ApiError>,
    {
        let mut cursor = PageCursor::from_params(&mut params);
        loop {
            if cursor.page_index > 0 {
                params.set(SKIP_PARAM, cursor.offset());
            }

            let mut page: Page = self.get(endpoint, params.clone())?;
            self.metrics().inc_page();
            tracing::debug!(
                endpoint,
                page = cursor.page_index,
                count = page.count,
                page_size = cursor.page_size,
                "fetched page"
            );

            if page.count > 0 {
                let Some(items) = page.take_items() else {
                    tracing::error!(endpoint, count = page.count, "page has no items");
                    return Err(ApiError::MalformedPage {
                        endpoint: endpoint.to_string(),
                        count: page.count,
                    });
                };
                sink(items)?;
            }

            if cursor.is_last(page.count) {
                return Ok(());
            }
            cursor.advance();
        }
    }

    /// Like [`ApiClient::paginate`] but decodes each page into `T`.
    pub fn paginate_as<T, F>(&self, endpoint: &str, params: Params, mut sink: F) -> Result<(), ApiError>
    where
        T: DeserializeOwned,
        F: FnMut(Vec<T>) -> Result<(), ApiError>,
    {
        self.paginate(endpoint, params, |items| sink(decode_items(items)?))
    }

    /// Streams pages into `out`. The sender is consumed, so the channel is
    /// closed when this returns, whether pagination succeeded or not.
    pub fn paginate_to_channel(
        &self,
        endpoint: &str,
        params: Params,
        out: SyncSender<Vec<Value>>,
    ) -> Result<(), ApiError> {
        self.paginate(endpoint, params, move |items| {
            out.send(items).map_err(|_| ApiError::SinkClosed)
        })
    }

    /// Collects every item of a paginated listing.
    pub fn paginate_all<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Params,
    ) -> Result<Vec<T>, ApiError> {
        let mut all = Vec::new();
        self.paginate_as(endpoint, params, |mut page: Vec<T>| {
            all.append(&mut page);
            Ok(())
        })?;
        Ok(all)
    }
}

pub fn decode_items<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<T>, ApiError> {
    let count = items.len();
    serde_json::from_value(Value::Array(items)).map_err(|source| ApiError::Decode {
        source,
        body: format!("<page of {count} items>"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::sync_channel;
    use std::sync::Arc;

    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::api::test_support::without_skip;
    use crate::auth::Credentials;
    use crate::metrics::Metrics;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(
            &server.base_url(),
            Arc::new(Credentials::basic("", "pat")),
            Arc::new(Metrics::new()),
        )
        .expect("client")
    }

    fn items(range: std::ops::Range<usize>) -> Vec<Value> {
        range.map(|i| json!({ "id": i })).collect()
    }

    #[test]
    fn cursor_defaults_and_writes_back_top() {
        let mut params = Params::new();
        let cursor = PageCursor::from_params(&mut params);
        assert_eq!(cursor.page_size, 100);
        assert_eq!(params.get(TOP_PARAM), Some("100"));

        let mut params = Params::new().with(TOP_PARAM, 200);
        let mut cursor = PageCursor::from_params(&mut params);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.offset(), 400);
        assert!(cursor.is_last(199));
        assert!(!cursor.is_last(200));
    }

    #[test]
    fn short_final_page_is_delivered_before_stopping() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/things")
                .query_param("$top", "2")
                .matches(without_skip);
            then.status(200)
                .json_body(json!({ "count": 2, "value": items(0..2) }));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/things")
                .query_param("$top", "2")
                .query_param("$skip", "2");
            then.status(200)
                .json_body(json!({ "count": 1, "value": items(2..3) }));
        });

        let mut seen = Vec::new();
        client(&server)
            .paginate("things", Params::new().with(TOP_PARAM, 2), |page| {
                seen.extend(page);
                Ok(())
            })
            .expect("paginate");

        first.assert_hits(1);
        second.assert_hits(1);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2]["id"], 2);
    }

    #[test]
    fn exact_full_page_requests_one_more_page() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET).path("/things").matches(without_skip);
            then.status(200)
                .json_body(json!({ "count": 2, "value": items(0..2) }));
        });
        let empty = server.mock(|when, then| {
            when.method(GET).path("/things").query_param("$skip", "2");
            then.status(200).json_body(json!({ "count": 0, "value": [] }));
        });

        let mut pages = 0;
        client(&server)
            .paginate("things", Params::new().with(TOP_PARAM, 2), |_| {
                pages += 1;
                Ok(())
            })
            .expect("paginate");

        first.assert_hits(1);
        empty.assert_hits(1);
        assert_eq!(pages, 1);
    }

    #[test]
    fn falls_back_to_comments_key() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/comments");
            then.status(200).json_body(json!({
                "count": 1,
                "totalCount": 1,
                "comments": [{ "id": 9, "text": "hi" }]
            }));
        });

        let all: Vec<Value> = client(&server)
            .paginate_all("comments", Params::new())
            .expect("paginate");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["text"], "hi");
    }

    #[test]
    fn page_without_items_is_a_protocol_violation() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/broken");
            then.status(200).json_body(json!({ "count": 3, "records": [] }));
        });

        let err = client(&server)
            .paginate("broken", Params::new(), |_| Ok(()))
            .expect_err("missing items should fail");
        assert!(matches!(err, ApiError::MalformedPage { count: 3, .. }));
    }

    #[test]
    fn transport_status_aborts_immediately() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/forbidden");
            then.status(403);
        });

        let err = client(&server)
            .paginate("forbidden", Params::new(), |_| Ok(()))
            .expect_err("403 should abort");
        assert_eq!(err.status().map(|s| s.as_u16()), Some(403));
        mock.assert_hits(1);
    }

    #[test]
    fn channel_is_closed_on_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/flaky").matches(without_skip);
            then.status(200)
                .json_body(json!({ "count": 1, "value": items(0..1) }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/flaky").query_param("$skip", "1");
            then.status(400);
        });

        let (tx, rx) = sync_channel(1);
        let consumer = std::thread::spawn(move || rx.into_iter().map(|page: Vec<Value>| page.len()).sum::<usize>());

        let result = client(&server).paginate_to_channel(
            "flaky",
            Params::new().with(TOP_PARAM, 1),
            tx,
        );
        assert!(result.is_err());
        assert_eq!(consumer.join().expect("consumer finished"), 1);
    }
}
