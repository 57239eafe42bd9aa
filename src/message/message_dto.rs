use serde::Deserialize;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

pub const DEFAULT_MESSAGE_PAGE_SIZE: u32 = 50;

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_has_body"))]
pub struct SendMessageRequest {
    #[validate(length(max = 4000))]
    pub content: String,
    #[serde(default)]
    #[validate(length(max = 10))]
    pub attachment_urls: Vec<String>,
}

impl SendMessageRequest {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment_urls: Vec::new(),
        }
    }
}

fn validate_has_body(request: &SendMessageRequest) -> Result<(), ValidationError> {
    if request.content.trim().is_empty() && request.attachment_urls.is_empty() {
        let mut error = ValidationError::new("empty_message");
        error.message = Some("Message content cannot be empty".into());
        return Err(error);
    }
    Ok(())
}
