//! 分页相关的数据结构

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 50;

#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// 页码，从 1 开始
    pub page: Option<u64>,
    /// 每页数量（1-50，默认 10）
    pub page_size: Option<u64>,
}

impl PaginationParams {
    pub fn new(page: Option<u64>, page_size: Option<u64>) -> Self {
        Self { page, page_size }
    }

    pub fn get_page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn get_page_size(&self) -> u64 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn get_offset(&self) -> u64 {
        (self.get_page() - 1) * self.get_page_size()
    }

    pub fn get_limit(&self) -> u64 {
        self.get_page_size()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(
    SeckillListPage = PaginatedResponse<crate::models::SeckillListItem>,
    OrderPage = PaginatedResponse<crate::models::OrderResponse>,
    DeadLetterPage = PaginatedResponse<crate::models::DeadLetterResponse>
)]
pub struct PaginatedResponse<T> {
    pub list: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(list: Vec<T>, params: &PaginationParams, total: u64) -> Self {
        Self {
            list,
            total,
            page: params.get_page(),
            page_size: params.get_page_size(),
        }
    }
}
