//! Query payload for the CRM's generic object-query endpoint.
//!
//! The CRM schema has drifted over time; only one contract version is
//! supported here and every payload is built from it.

use chrono::NaiveDate;
use serde::Serialize;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Published/approved comments carry this state id.
pub const PUBLISHED_STATE_ID: i64 = 3;
pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryContract {
    pub version: u32,
    pub select: &'static [&'static str],
    pub state_column: &'static str,
    pub date_column: &'static str,
    pub hotel_column: &'static str,
}

impl QueryContract {
    pub const CURRENT: QueryContract = QueryContract {
        version: 3,
        select: &[
            "COMMENTID",
            "HOTELID",
            "STATEID",
            "COMMENTDATE",
            "COMMENT",
            "ANSWER",
            "SOURCENAME",
            "GROUPNAME",
            "TAGS",
            "GUESTNAME",
            "NATIONALITY",
            "EMAIL",
            "PHONE",
            "ROOMNO",
            "CHECKIN",
            "CHECKOUT",
            "SCORE",
            "ALLOWSMS",
            "ALLOWWHATSAPP",
            "ALLOWEMAIL",
            "ALLOWPHONE",
            "GDPRCONFIRMED",
        ],
        state_column: "STATEID",
        date_column: "COMMENTDATE",
        hotel_column: "HOTELID",
    };
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryPayload {
    pub action: String,
    pub object: String,
    pub select: Vec<&'static str>,
    #[serde(rename = "Where")]
    pub filters: Vec<Filter>,
    pub order_by: Vec<Order>,
    pub paging: Paging,
    pub login_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Filter {
    pub column: &'static str,
    pub operator: &'static str,
    pub value: FilterValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Order {
    pub column: &'static str,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Paging {
    pub items_per_page: u32,
    pub current: u32,
}

#[derive(Debug, Clone)]
pub struct CommentQuery<'a> {
    pub hotel_id: &'a str,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub action: &'a str,
    pub object_name: &'a str,
    pub login_token: &'a str,
}

impl CommentQuery<'_> {
    pub fn build(&self) -> QueryPayload {
        self.build_with(&QueryContract::CURRENT)
    }

    pub fn build_with(&self, contract: &QueryContract) -> QueryPayload {
        let filters = vec![
            Filter {
                column: contract.state_column,
                operator: "=",
                value: FilterValue::Number(PUBLISHED_STATE_ID),
            },
            Filter {
                column: contract.date_column,
                operator: ">=",
                value: FilterValue::Text(self.start.format(DATE_FORMAT).to_string()),
            },
            Filter {
                column: contract.date_column,
                operator: "<=",
                value: FilterValue::Text(self.end.format(DATE_FORMAT).to_string()),
            },
            Filter {
                column: contract.hotel_column,
                operator: "=",
                value: hotel_value(self.hotel_id),
            },
        ];

        QueryPayload {
            action: self.action.to_owned(),
            object: self.object_name.to_owned(),
            select: contract.select.to_vec(),
            filters,
            order_by: vec![Order {
                column: contract.date_column,
                direction: Direction::Desc,
            }],
            paging: Paging {
                items_per_page: PAGE_SIZE,
                current: 1,
            },
            login_token: self.login_token.to_owned(),
        }
    }
}

// The schema types HOTELID as a number; keep text only when it isn't one.
fn hotel_value(hotel_id: &str) -> FilterValue {
    let trimmed = hotel_id.trim();
    trimmed
        .parse::<i64>()
        .map(FilterValue::Number)
        .unwrap_or_else(|_| FilterValue::Text(trimmed.to_owned()))
}
