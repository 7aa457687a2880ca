//! List query parameters and their validation into repository filters.
//!
//! Every parameter is checked and all problems are reported together in a
//! single [`Error::InvalidParameter`].

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{algorithm::KeyPoolAlgorithm, error::Error};

pub const DEFAULT_PAGE_SIZE: u32 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A column list results can be ordered by.
pub trait SortField: Copy + std::str::FromStr {
    fn column(self) -> &'static str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum KeyPoolSortField {
    #[strum(serialize = "id", serialize = "key_pool_id")]
    Id,
    Name,
    Provider,
    Algorithm,
    Status,
}

impl SortField for KeyPoolSortField {
    fn column(self) -> &'static str {
        match self {
            Self::Id => "key_pool_id",
            Self::Name => "name",
            Self::Provider => "provider",
            Self::Algorithm => "algorithm",
            Self::Status => "status",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum KeySortField {
    KeyPoolId,
    #[strum(serialize = "id", serialize = "key_id")]
    KeyId,
    GenerateDate,
    ImportDate,
}

impl SortField for KeySortField {
    fn column(self) -> &'static str {
        match self {
            Self::KeyPoolId => "key_pool_id",
            Self::KeyId => "key_id",
            Self::GenerateDate => "key_generate_date",
            Self::ImportDate => "key_import_date",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sort<F> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F: SortField> Sort<F> {
    /// Parses `field` or `field:ASC|DESC`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (field, direction) = match s.split_once(':') {
            Some((field, direction)) => (field, Some(direction)),
            None => (s, None),
        };
        let field = field
            .trim()
            .parse::<F>()
            .map_err(|_| format!("unknown sort field {field:?}"))?;
        let direction = match direction.map(|d| d.trim().to_ascii_uppercase()).as_deref() {
            None | Some("ASC") => SortDirection::Asc,
            Some("DESC") => SortDirection::Desc,
            Some(other) => return Err(format!("unknown sort direction {other:?}")),
        };
        Ok(Self { field, direction })
    }
}

/// Parameters of a key pool listing, as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Builder)]
pub struct KeyPoolsQuery {
    pub key_pool_ids: Option<Vec<Uuid>>,
    pub names: Option<Vec<String>>,
    pub algorithms: Option<Vec<String>>,
    pub versioning_allowed: Option<bool>,
    pub import_allowed: Option<bool>,
    pub export_allowed: Option<bool>,
    pub sorts: Option<Vec<String>>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// Parameters of a key listing within one key pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Builder)]
pub struct KeyPoolKeysQuery {
    pub key_ids: Option<Vec<Uuid>>,
    pub min_generate_date: Option<DateTime<Utc>>,
    pub max_generate_date: Option<DateTime<Utc>>,
    pub sorts: Option<Vec<String>>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// Parameters of a key listing across key pools.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Builder)]
pub struct KeysQuery {
    pub key_pool_ids: Option<Vec<Uuid>>,
    pub key_ids: Option<Vec<Uuid>>,
    pub min_generate_date: Option<DateTime<Utc>>,
    pub max_generate_date: Option<DateTime<Utc>>,
    pub sorts: Option<Vec<String>>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn offset(&self) -> i64 {
        i64::from(self.number) * i64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPoolFilters {
    pub key_pool_ids: Vec<Uuid>,
    pub names: Vec<String>,
    pub algorithms: Vec<KeyPoolAlgorithm>,
    pub versioning_allowed: Option<bool>,
    pub import_allowed: Option<bool>,
    pub export_allowed: Option<bool>,
    pub sorts: Vec<Sort<KeyPoolSortField>>,
    pub page: Page,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyFilters {
    pub key_pool_ids: Vec<Uuid>,
    pub key_ids: Vec<Uuid>,
    pub min_generate_date: Option<DateTime<Utc>>,
    pub max_generate_date: Option<DateTime<Utc>>,
    pub sorts: Vec<Sort<KeySortField>>,
    pub page: Page,
}

/// Collects validation problems so they can be reported together.
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn check<T>(&mut self, label: &str, result: Result<T, String>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.0.push(format!("invalid {label}: {e}"));
                None
            }
        }
    }

    fn finish(self, query: &str) -> Result<(), Error> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_parameter(format!(
                "invalid {query} parameters: {}",
                self.0.join("; ")
            )))
        }
    }
}

fn uuids(values: &Option<Vec<Uuid>>) -> Result<Vec<Uuid>, String> {
    let values = values.clone().unwrap_or_default();
    if values.iter().any(Uuid::is_nil) {
        return Err("invalid UUIDs".to_owned());
    }
    Ok(values)
}

fn strings(values: &Option<Vec<String>>) -> Result<Vec<String>, String> {
    let values = values.clone().unwrap_or_default();
    if values.iter().any(String::is_empty) {
        return Err("value must not be empty string".to_owned());
    }
    Ok(values)
}

fn algorithms(values: &Option<Vec<String>>) -> Result<Vec<KeyPoolAlgorithm>, String> {
    values
        .iter()
        .flatten()
        .map(|s| KeyPoolAlgorithm::parse(s).map_err(|e| e.to_string()))
        .collect()
}

fn sorts<F: SortField>(values: &Option<Vec<String>>) -> Result<Vec<Sort<F>>, String> {
    values.iter().flatten().map(|s| Sort::parse(s)).collect()
}

fn date_range(
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), String> {
    let mut errs = Vec::new();
    if let Some(min) = min {
        if min > Utc::now() {
            errs.push("Min Date can't be in the future");
        }
        if let Some(max) = max {
            if min > max {
                errs.push("Min Date must be before Max Date");
            }
        }
    }
    if errs.is_empty() {
        Ok((min, max))
    } else {
        Err(errs.join(", "))
    }
}

fn page_number(page: Option<i64>) -> Result<u32, String> {
    match page {
        None => Ok(0),
        Some(n) => u32::try_from(n).map_err(|_| "Page Number must be zero or higher".to_owned()),
    }
}

fn page_size(size: Option<i64>) -> Result<u32, String> {
    match size {
        None => Ok(DEFAULT_PAGE_SIZE),
        Some(n) if n >= 1 => u32::try_from(n).map_err(|_| "Page Size is too large".to_owned()),
        Some(_) => Err("Page Size must be one or higher".to_owned()),
    }
}

impl KeyPoolsQuery {
    pub fn validate(&self) -> Result<KeyPoolFilters, Error> {
        let mut problems = Problems::default();

        let key_pool_ids = problems.check("Key Pool ID", uuids(&self.key_pool_ids));
        let names = problems.check("Key Pool Name", strings(&self.names));
        let algorithms = problems.check("Key Pool Algorithm", algorithms(&self.algorithms));
        let sorts = problems.check("Key Pool Sort", sorts(&self.sorts));
        let number = problems.check("Page Number", page_number(self.page));
        let size = problems.check("Page Size", page_size(self.size));

        problems.finish("Get Key Pools")?;

        Ok(KeyPoolFilters {
            key_pool_ids: key_pool_ids.unwrap_or_default(),
            names: names.unwrap_or_default(),
            algorithms: algorithms.unwrap_or_default(),
            versioning_allowed: self.versioning_allowed,
            import_allowed: self.import_allowed,
            export_allowed: self.export_allowed,
            sorts: sorts.unwrap_or_default(),
            page: Page {
                number: number.unwrap_or_default(),
                size: size.unwrap_or(DEFAULT_PAGE_SIZE),
            },
        })
    }
}

impl KeyPoolKeysQuery {
    pub fn validate(&self, key_pool_id: Uuid) -> Result<KeyFilters, Error> {
        let mut problems = Problems::default();

        let key_ids = problems.check("Key ID", uuids(&self.key_ids));
        let dates = problems.check(
            "Generate Date range",
            date_range(self.min_generate_date, self.max_generate_date),
        );
        let sorts = problems.check("Key Sort", sorts(&self.sorts));
        let number = problems.check("Page Number", page_number(self.page));
        let size = problems.check("Page Size", page_size(self.size));

        problems.finish("Get Key Pool Keys")?;

        let (min_generate_date, max_generate_date) = dates.unwrap_or_default();
        Ok(KeyFilters {
            key_pool_ids: vec![key_pool_id],
            key_ids: key_ids.unwrap_or_default(),
            min_generate_date,
            max_generate_date,
            sorts: sorts.unwrap_or_default(),
            page: Page {
                number: number.unwrap_or_default(),
                size: size.unwrap_or(DEFAULT_PAGE_SIZE),
            },
        })
    }
}

impl KeysQuery {
    pub fn validate(&self) -> Result<KeyFilters, Error> {
        let mut problems = Problems::default();

        let key_pool_ids = problems.check("Key Pool ID", uuids(&self.key_pool_ids));
        let key_ids = problems.check("Key ID", uuids(&self.key_ids));
        let dates = problems.check(
            "Generate Date range",
            date_range(self.min_generate_date, self.max_generate_date),
        );
        let sorts = problems.check("Key Sort", sorts(&self.sorts));
        let number = problems.check("Page Number", page_number(self.page));
        let size = problems.check("Page Size", page_size(self.size));

        problems.finish("Get Keys")?;

        let (min_generate_date, max_generate_date) = dates.unwrap_or_default();
        Ok(KeyFilters {
            key_pool_ids: key_pool_ids.unwrap_or_default(),
            key_ids: key_ids.unwrap_or_default(),
            min_generate_date,
            max_generate_date,
            sorts: sorts.unwrap_or_default(),
            page: Page {
                number: number.unwrap_or_default(),
                size: size.unwrap_or(DEFAULT_PAGE_SIZE),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn empty_query_uses_defaults() {
        let filters = KeyPoolsQuery::default().validate().unwrap();
        assert_eq!(filters, KeyPoolFilters::default());
        assert_eq!(filters.page.size, 25);
        assert_eq!(filters.page.offset(), 0);
    }

    #[test]
    fn flag_filters_pass_through() {
        let filters = KeyPoolsQuery::builder()
            .export_allowed(true)
            .import_allowed(false)
            .build()
            .validate()
            .unwrap();
        assert_eq!(filters.export_allowed, Some(true));
        assert_eq!(filters.import_allowed, Some(false));
        assert_eq!(filters.versioning_allowed, None);
    }

    #[test]
    fn problems_are_aggregated() {
        let query = KeyPoolsQuery::builder()
            .key_pool_ids(vec![Uuid::nil()])
            .names(vec![String::new()])
            .algorithms(vec!["A1024GCM/dir".to_owned()])
            .page(-1)
            .size(0)
            .build();

        let Err(Error::InvalidParameter { message }) = query.validate() else {
            panic!("expected invalid parameters");
        };
        assert!(message.starts_with("invalid Get Key Pools parameters: "));
        for expected in [
            "invalid UUIDs",
            "value must not be empty string",
            "unsupported algorithm: A1024GCM/dir",
            "Page Number must be zero or higher",
            "Page Size must be one or higher",
        ] {
            assert!(message.contains(expected), "{message} lacks {expected}");
        }
    }

    #[test]
    fn sorts_parse_with_optional_direction() {
        let filters = KeyPoolsQuery::builder()
            .sorts(vec!["name".to_owned(), "STATUS:desc".to_owned()])
            .build()
            .validate()
            .unwrap();
        assert_eq!(
            filters.sorts,
            vec![
                Sort {
                    field: KeyPoolSortField::Name,
                    direction: SortDirection::Asc
                },
                Sort {
                    field: KeyPoolSortField::Status,
                    direction: SortDirection::Desc
                },
            ]
        );

        let query = KeysQuery::builder()
            .sorts(vec!["generate_date:sideways".to_owned()])
            .build();
        assert!(query.validate().is_err());
    }

    #[test]
    fn date_range_must_be_ordered_and_not_in_the_future() {
        let now = Utc::now();
        let query = KeysQuery::builder()
            .min_generate_date(now - Duration::hours(1))
            .max_generate_date(now - Duration::hours(2))
            .build();
        assert!(query.validate().is_err());

        let query = KeysQuery::builder()
            .min_generate_date(now + Duration::hours(1))
            .build();
        assert!(query.validate().is_err());

        let query = KeysQuery::builder()
            .min_generate_date(now - Duration::hours(2))
            .max_generate_date(now + Duration::hours(2))
            .build();
        assert!(query.validate().is_ok());
    }

    #[test]
    fn key_pool_keys_are_scoped_to_their_pool() {
        let id = Uuid::now_v7();
        let filters = KeyPoolKeysQuery::default().validate(id).unwrap();
        assert_eq!(filters.key_pool_ids, vec![id]);
    }
}
