use crate::error::codes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 统一响应包装：`{code, msg, data}`，code 200 表示成功
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: codes::OK,
            msg: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, msg: impl Into<String>) -> Self {
        Self {
            code: codes::OK,
            msg: msg.into(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::success(7)).unwrap();
        assert_eq!(body["code"], 200);
        assert_eq!(body["msg"], "success");
        assert_eq!(body["data"], 7);
    }
}
