use serde::Deserialize;

use ske_core::{EntityId, NewEntity, Pagination, PaginationPolicy};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// `POST /entities` body. A missing title reads as empty and fails validation.
#[derive(Debug, Deserialize)]
pub struct CreateEntityRequest {
    #[serde(default)]
    pub title: String,
}

impl From<CreateEntityRequest> for NewEntity {
    fn from(req: CreateEntityRequest) -> Self {
        NewEntity::new(req.title)
    }
}

/// Raw `?limit=&offset=`; parsed by [`parse_pagination`].
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_entity_id(raw: &str) -> Result<EntityId, axum::response::Response> {
    raw.parse::<EntityId>().map_err(errors::invalid_id)
}

pub fn parse_pagination(
    policy: &PaginationPolicy,
    query: &ListQuery,
) -> Result<Pagination, axum::response::Response> {
    policy
        .parse(query.limit.as_deref(), query.offset.as_deref())
        .map_err(|e| errors::invalid_pagination(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_title_defaults_to_empty() {
        let req: CreateEntityRequest = serde_json::from_str(r#"{"other": 1}"#).unwrap();
        assert_eq!(req.title, "");
    }

    #[test]
    fn pagination_defaults_and_caps() {
        let policy = PaginationPolicy::default();
        let page = parse_pagination(&policy, &ListQuery::default()).unwrap();
        assert_eq!(page, Pagination { limit: 20, offset: 0 });

        let query = ListQuery {
            limit: Some("1000".into()),
            offset: Some("3".into()),
        };
        assert_eq!(
            parse_pagination(&policy, &query).unwrap(),
            Pagination { limit: 100, offset: 3 }
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        let policy = PaginationPolicy::default();
        for (limit, offset) in [("-1", "0"), ("abc", "0"), ("1", "-5")] {
            let query = ListQuery {
                limit: Some(limit.into()),
                offset: Some(offset.into()),
            };
            let res = parse_pagination(&policy, &query).unwrap_err();
            assert_eq!(res.status(), axum::http::StatusCode::BAD_REQUEST);
        }
        assert!(parse_entity_id("not-a-uuid").is_err());
    }
}
