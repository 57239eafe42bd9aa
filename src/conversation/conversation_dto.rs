use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;
use uuid::Uuid;

use super::conversation_models::ConversationResponse;

pub const DEFAULT_CONVERSATION_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    pub participant_ids: Vec<Uuid>,
    #[validate(length(max = 4000))]
    pub initial_message: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkConversationReadRequest {
    pub read_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    /// Returns `(page, page_size)` with the page clamped to 1.. and the size to 1..=MAX_PAGE_SIZE.
    pub fn resolve(&self, default_page_size: u32) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self
            .page_size
            .unwrap_or(default_page_size)
            .clamp(1, MAX_PAGE_SIZE);
        (page, page_size)
    }
}

/// Converts a 1-based page into `(limit, offset)`.
pub fn page_window(page: u32, page_size: u32) -> (i64, i64) {
    let page = page.max(1) as i64;
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE) as i64;
    (page_size, (page - 1) * page_size)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationResponse>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_defaults_and_clamps() {
        assert_eq!(PageQuery::default().resolve(20), (1, 20));

        let query = PageQuery { page: Some(0), page_size: Some(500) };
        assert_eq!(query.resolve(20), (1, MAX_PAGE_SIZE));

        let query = PageQuery { page: Some(3), page_size: Some(0) };
        assert_eq!(query.resolve(50), (3, 1));
    }

    #[test]
    fn test_page_window_skips_previous_pages() {
        assert_eq!(page_window(1, 50), (50, 0));
        assert_eq!(page_window(3, 20), (20, 40));
    }
}
