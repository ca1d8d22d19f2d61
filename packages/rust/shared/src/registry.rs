//! File type registry.
//!
//! The closed catalog of role codes a source resource can be tagged with.
//! Each [`FileType`] carries its domain, canonical staging filename,
//! cardinality rules, and whether it marks the published destination.
//! Raw codes and names are validated once through [`resolve`]; everything
//! past that point works with [`FileType`] values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IatiError, Result};

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// The two record families a merged document can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Organization,
    Activity,
}

impl Domain {
    /// All domains, in catalog order.
    pub const ALL: [Domain; 2] = [Domain::Organization, Domain::Activity];

    /// Lowercase identifier used in storage and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Activity => "activity",
        }
    }

    /// Half-open range of codes owned by this domain.
    pub fn code_range(&self) -> std::ops::Range<u16> {
        match self {
            Self::Organization => 100..200,
            Self::Activity => 200..400,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = IatiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "organization" | "organisation" | "org" => Ok(Self::Organization),
            "activity" | "activities" | "act" => Ok(Self::Activity),
            other => Err(IatiError::validation(format!(
                "unknown domain '{other}': expected 'organization' or 'activity'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Cardinality
// ---------------------------------------------------------------------------

/// How many sources may carry one file type within a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxCount {
    Limited(usize),
    Unbounded,
}

impl MaxCount {
    /// Whether `found` sources exceed this limit.
    pub fn exceeded_by(&self, found: usize) -> bool {
        match self {
            Self::Limited(max) => found > *max,
            Self::Unbounded => false,
        }
    }
}

// ---------------------------------------------------------------------------
// FileType
// ---------------------------------------------------------------------------

/// A role a tagged source plays in the merged document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    // Organization
    OrganizationMainFile,
    OrganizationNamesFile,
    OrganizationBudgetFile,
    OrganizationExpenditureFile,
    OrganizationDocumentFile,
    FinalOrganizationFile,
    // Activity
    ActivityMainFile,
    ActivityParticipatingOrgsFile,
    ActivitySectorsFile,
    ActivityBudgetFile,
    ActivityTransactionsFile,
    ActivityTransactionSectorsFile,
    ActivityLocationsFile,
    ActivityDocumentsFile,
    ActivityResultsFile,
    ActivityIndicatorsFile,
    ActivityIndicatorPeriodsFile,
    ActivityDatesFile,
    ActivityContactInfoFile,
    ActivityConditionsFile,
    ActivityDescriptionsFile,
    ActivityCountryBudgetItemsFile,
    FinalActivityFile,
}

/// Static metadata attached to each catalog entry.
struct Entry {
    code: u16,
    name: &'static str,
    filename: &'static str,
    required: bool,
    final_artifact: bool,
}

const fn component(code: u16, name: &'static str, filename: &'static str, required: bool) -> Entry {
    Entry {
        code,
        name,
        filename,
        required,
        final_artifact: false,
    }
}

const fn destination(code: u16, name: &'static str, filename: &'static str) -> Entry {
    Entry {
        code,
        name,
        filename,
        required: false,
        final_artifact: true,
    }
}

impl FileType {
    /// Every catalog entry, ordered by code.
    pub const ALL: [FileType; 23] = [
        FileType::OrganizationMainFile,
        FileType::OrganizationNamesFile,
        FileType::OrganizationBudgetFile,
        FileType::OrganizationExpenditureFile,
        FileType::OrganizationDocumentFile,
        FileType::FinalOrganizationFile,
        FileType::ActivityMainFile,
        FileType::ActivityParticipatingOrgsFile,
        FileType::ActivitySectorsFile,
        FileType::ActivityBudgetFile,
        FileType::ActivityTransactionsFile,
        FileType::ActivityTransactionSectorsFile,
        FileType::ActivityLocationsFile,
        FileType::ActivityDocumentsFile,
        FileType::ActivityResultsFile,
        FileType::ActivityIndicatorsFile,
        FileType::ActivityIndicatorPeriodsFile,
        FileType::ActivityDatesFile,
        FileType::ActivityContactInfoFile,
        FileType::ActivityConditionsFile,
        FileType::ActivityDescriptionsFile,
        FileType::ActivityCountryBudgetItemsFile,
        FileType::FinalActivityFile,
    ];

    fn entry(&self) -> Entry {
        use FileType::*;
        match self {
            OrganizationMainFile => component(100, "ORGANIZATION_MAIN_FILE", "organisations.csv", true),
            OrganizationNamesFile => component(110, "ORGANIZATION_NAMES_FILE", "names.csv", false),
            OrganizationBudgetFile => component(120, "ORGANIZATION_BUDGET_FILE", "budgets.csv", false),
            OrganizationExpenditureFile => {
                component(130, "ORGANIZATION_EXPENDITURE_FILE", "expenditures.csv", false)
            }
            OrganizationDocumentFile => component(140, "ORGANIZATION_DOCUMENT_FILE", "documents.csv", false),
            FinalOrganizationFile => destination(199, "FINAL_ORGANIZATION_FILE", "organisation.xml"),
            ActivityMainFile => component(200, "ACTIVITY_MAIN_FILE", "activities.csv", true),
            ActivityParticipatingOrgsFile => {
                component(210, "ACTIVITY_PARTICIPATING_ORGS_FILE", "participating_orgs.csv", false)
            }
            ActivitySectorsFile => component(220, "ACTIVITY_SECTORS_FILE", "sectors.csv", false),
            ActivityBudgetFile => component(230, "ACTIVITY_BUDGET_FILE", "budgets.csv", false),
            ActivityTransactionsFile => component(240, "ACTIVITY_TRANSACTIONS_FILE", "transactions.csv", false),
            ActivityTransactionSectorsFile => component(
                250,
                "ACTIVITY_TRANSACTION_SECTORS_FILE",
                "transaction_sectors.csv",
                false,
            ),
            ActivityLocationsFile => component(260, "ACTIVITY_LOCATIONS_FILE", "locations.csv", false),
            ActivityDocumentsFile => component(270, "ACTIVITY_DOCUMENTS_FILE", "documents.csv", false),
            ActivityResultsFile => component(280, "ACTIVITY_RESULTS_FILE", "results.csv", false),
            ActivityIndicatorsFile => component(290, "ACTIVITY_INDICATORS_FILE", "indicators.csv", false),
            ActivityIndicatorPeriodsFile => component(
                300,
                "ACTIVITY_INDICATOR_PERIODS_FILE",
                "indicator_periods.csv",
                false,
            ),
            ActivityDatesFile => component(310, "ACTIVITY_DATES_FILE", "activity_date.csv", false),
            ActivityContactInfoFile => component(320, "ACTIVITY_CONTACT_INFO_FILE", "contact_info.csv", false),
            ActivityConditionsFile => component(330, "ACTIVITY_CONDITIONS_FILE", "conditions.csv", false),
            ActivityDescriptionsFile => component(340, "ACTIVITY_DESCRIPTIONS_FILE", "descriptions.csv", false),
            ActivityCountryBudgetItemsFile => component(
                350,
                "ACTIVITY_COUNTRY_BUDGET_ITEMS_FILE",
                "country_budget_items.csv",
                false,
            ),
            FinalActivityFile => destination(399, "FINAL_ACTIVITY_FILE", "activity.xml"),
        }
    }

    /// Numeric role code.
    pub fn code(&self) -> u16 {
        self.entry().code
    }

    /// Symbolic name (e.g. `ORGANIZATION_MAIN_FILE`).
    pub fn name(&self) -> &'static str {
        self.entry().name
    }

    /// Domain this role belongs to, derived from the code range.
    pub fn domain(&self) -> Domain {
        let code = self.code();
        if Domain::Organization.code_range().contains(&code) {
            Domain::Organization
        } else {
            Domain::Activity
        }
    }

    /// Canonical filename used when staging (or publishing) this role.
    pub fn filename(&self) -> &'static str {
        self.entry().filename
    }

    /// Whether a run fails when no source carries this role.
    pub fn required(&self) -> bool {
        self.entry().required
    }

    /// How many sources may carry this role per namespace.
    pub fn max_count(&self) -> MaxCount {
        MaxCount::Limited(1)
    }

    /// Whether this role marks the published destination of its domain.
    pub fn is_final_artifact(&self) -> bool {
        self.entry().final_artifact
    }

    /// Look up a file type by numeric code.
    pub fn from_code(code: u16) -> Option<FileType> {
        Self::ALL.into_iter().find(|ft| ft.code() == code)
    }

    /// Look up a file type by symbolic name (case-insensitive).
    pub fn from_name(name: &str) -> Option<FileType> {
        Self::ALL
            .into_iter()
            .find(|ft| ft.name().eq_ignore_ascii_case(name))
    }

    /// Component roles of a domain (the final artifact excluded), by code.
    pub fn components(domain: Domain) -> impl Iterator<Item = FileType> {
        Self::ALL
            .into_iter()
            .filter(move |ft| ft.domain() == domain && !ft.is_final_artifact())
    }

    /// The destination role of a domain.
    pub fn final_artifact(domain: Domain) -> FileType {
        match domain {
            Domain::Organization => FileType::FinalOrganizationFile,
            Domain::Activity => FileType::FinalActivityFile,
        }
    }

    /// Map a canonical component filename back to its role within a domain.
    pub fn from_filename(domain: Domain, filename: &str) -> Option<FileType> {
        let filename = filename.trim();
        let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        Self::components(domain).find(|ft| ft.filename().eq_ignore_ascii_case(base))
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileType {
    type Err = IatiError;

    fn from_str(s: &str) -> Result<Self> {
        resolve(s)
    }
}

impl Serialize for FileType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for FileType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        resolve(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Registry operations
// ---------------------------------------------------------------------------

/// Resolve a role from either its numeric code (`"100"`) or its name
/// (`"ORGANIZATION_MAIN_FILE"`). Both spellings yield the same value.
pub fn resolve(code_or_name: &str) -> Result<FileType> {
    let input = code_or_name.trim();
    let found = match input.parse::<u16>() {
        Ok(code) => FileType::from_code(code),
        Err(_) => FileType::from_name(input),
    };
    found.ok_or_else(|| IatiError::InvalidFileType {
        input: code_or_name.to_string(),
    })
}

/// Domain a role belongs to.
pub fn domain_of(file_type: FileType) -> Domain {
    file_type.domain()
}

/// Canonical filename for a role.
pub fn filename_for(file_type: FileType) -> &'static str {
    file_type.filename()
}

/// Whether a role marks its domain's published destination.
pub fn is_final_artifact(file_type: FileType) -> bool {
    file_type.is_final_artifact()
}

/// A `{value, label}` option for selection widgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTypeOption {
    /// Numeric code as a string.
    pub value: String,
    /// Name with underscores replaced and words title-cased.
    pub label: String,
}

/// All catalog entries as presentation options, ordered by code.
pub fn options() -> Vec<FileTypeOption> {
    FileType::ALL
        .iter()
        .map(|ft| FileTypeOption {
            value: ft.code().to_string(),
            label: title_case(ft.name()),
        })
        .collect()
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let lower = w.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
