// ABOUTME: Reconciliation rules loaded from reconcile.toml
// ABOUTME: Immutable registry of databases, table rules, and delegated fields

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::{split_table_name, validate_column_name};

/// Which store governs row existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterSource {
    #[default]
    Primary,
    Secondary,
}

/// How one table is reconciled between the two stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRule {
    pub primary_table: String,
    pub secondary_table: String,
    pub primary_key_field: String,
    /// Fields the secondary store is authoritative for
    pub delegated_fields: BTreeSet<String>,
    pub master_source: MasterSource,
}

impl SyncRule {
    /// A rule for a table with the same name in both stores and no delegated fields.
    pub fn new(table: &str, primary_key_field: &str) -> Self {
        Self {
            primary_table: table.to_string(),
            secondary_table: table.to_string(),
            primary_key_field: primary_key_field.to_string(),
            delegated_fields: BTreeSet::new(),
            master_source: MasterSource::Primary,
        }
    }

    pub fn with_secondary_table(mut self, table: &str) -> Self {
        self.secondary_table = table.to_string();
        self
    }

    pub fn with_delegated_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.delegated_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_master_source(mut self, master_source: MasterSource) -> Self {
        self.master_source = master_source;
        self
    }

    pub fn is_delegated(&self, field: &str) -> bool {
        self.delegated_fields.contains(field)
    }

    fn validate(&self, database: &str) -> Result<()> {
        split_table_name(&self.primary_table).with_context(|| {
            format!("Invalid primary table in database '{}'", database)
        })?;
        split_table_name(&self.secondary_table).with_context(|| {
            format!("Invalid secondary table in database '{}'", database)
        })?;
        validate_column_name(&self.primary_key_field).with_context(|| {
            format!(
                "Invalid primary key for table '{}' in database '{}'",
                self.primary_table, database
            )
        })?;
        for field in &self.delegated_fields {
            validate_column_name(field).with_context(|| {
                format!(
                    "Invalid delegated field for table '{}' in database '{}'",
                    self.primary_table, database
                )
            })?;
        }
        if self.is_delegated(&self.primary_key_field) {
            bail!(
                "Table '{}' in database '{}' delegates its primary key '{}'; the key cannot be authored by the secondary store",
                self.primary_table,
                database,
                self.primary_key_field
            );
        }
        Ok(())
    }
}

/// One logical database: a primary/secondary store pair and its table rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub name: String,
    /// Locator of the primary store (PostgreSQL URL or SQLite path)
    pub primary: String,
    /// Locator of the secondary store; created on first run if absent
    pub secondary: String,
    pub tables: Vec<SyncRule>,
}

impl DatabaseConfig {
    pub fn new(name: &str, primary: &str, secondary: &str) -> Self {
        Self {
            name: name.to_string(),
            primary: primary.to_string(),
            secondary: secondary.to_string(),
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, rule: SyncRule) -> Self {
        self.tables.push(rule);
        self
    }

    /// Whether any table lets the secondary store write back to the primary.
    pub fn is_bidirectional(&self) -> bool {
        self.tables.iter().any(|rule| {
            !rule.delegated_fields.is_empty() || rule.master_source == MasterSource::Secondary
        })
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Database name cannot be empty");
        }
        if self.primary.trim().is_empty() {
            bail!("Database '{}' has no primary store locator", self.name);
        }
        if self.secondary.trim().is_empty() {
            bail!("Database '{}' has no secondary store locator", self.name);
        }
        for rule in &self.tables {
            rule.validate(&self.name)?;
        }
        Ok(())
    }
}

/// Every configured database, validated once and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRuleRegistry {
    databases: Vec<DatabaseConfig>,
}

impl SyncRuleRegistry {
    pub fn new(databases: Vec<DatabaseConfig>) -> Result<Self> {
        if databases.is_empty() {
            bail!("No databases configured");
        }

        let mut seen = HashSet::new();
        for database in &databases {
            database.validate()?;
            if !seen.insert(database.name.as_str()) {
                bail!("Database '{}' is configured more than once", database.name);
            }
        }

        Ok(Self { databases })
    }

    /// Parse a registry from TOML text.
    ///
    /// # Examples
    ///
    /// ```
    /// # use database_reconciler::config::SyncRuleRegistry;
    /// let registry = SyncRuleRegistry::from_toml_str(r#"
    ///     [[databases]]
    ///     name = "crm"
    ///     primary = "/data/crm.db"
    ///     secondary = "/data/local.db"
    ///
    ///     [[databases.tables]]
    ///     primary_table = "clientes"
    ///     primary_key = "id"
    ///     delegated_fields = ["status"]
    /// "#).unwrap();
    /// let rule = &registry.get("crm").unwrap().tables[0];
    /// assert_eq!(rule.secondary_table, "clientes");
    /// assert!(rule.is_delegated("status"));
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse reconcile config")?;
        Self::new(raw.databases.into_iter().map(DatabaseConfig::from).collect())
    }

    /// Load a registry from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reconcile config from {:?}", path))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid reconcile config in {:?}", path))
    }

    pub fn databases(&self) -> &[DatabaseConfig] {
        &self.databases
    }

    pub fn get(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.name == name)
    }

    /// Restrict the registry to the named databases, in the order given.
    pub fn select(&self, names: &[String]) -> Result<Vec<DatabaseConfig>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Database '{}' is not configured", name))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    databases: Vec<RawDatabase>,
}

#[derive(Debug, Deserialize)]
struct RawDatabase {
    name: String,
    primary: String,
    secondary: String,
    #[serde(default)]
    tables: Vec<RawTableRule>,
}

#[derive(Debug, Deserialize)]
struct RawTableRule {
    primary_table: String,
    secondary_table: Option<String>,
    primary_key: String,
    #[serde(default)]
    delegated_fields: Vec<String>,
    #[serde(default)]
    master_source: MasterSource,
}

impl From<RawDatabase> for DatabaseConfig {
    fn from(raw: RawDatabase) -> Self {
        Self {
            name: raw.name,
            primary: raw.primary,
            secondary: raw.secondary,
            tables: raw.tables.into_iter().map(SyncRule::from).collect(),
        }
    }
}

impl From<RawTableRule> for SyncRule {
    fn from(raw: RawTableRule) -> Self {
        let secondary_table = raw
            .secondary_table
            .unwrap_or_else(|| raw.primary_table.clone());
        Self {
            primary_table: raw.primary_table,
            secondary_table,
            primary_key_field: raw.primary_key,
            delegated_fields: raw.delegated_fields.into_iter().collect(),
            master_source: raw.master_source,
        }
    }
}
