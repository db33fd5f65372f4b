//! Core types: record descriptors, field categories, default-value specs.

use std::time::Duration;

use serde_json::Value;

use crate::error::ContractError;

/// A page of primary keys returned by an index scan, with the cursor to pass
/// to the next call. A `cursor` of 0 means the scan is complete.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub ids: Vec<String>,
    pub cursor: u64,
}

/// How a zero-valued field is filled in before a save.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultSpec {
    /// A literal JSON value.
    Literal(Value),
    /// A freshly minted UUID v4 string.
    Uuid,
    /// The current UTC time as an RFC 3339 string.
    NowRfc3339,
    /// The current Unix time in seconds.
    UnixSeconds,
    /// The current Unix time in milliseconds.
    UnixMillis,
}

/// A single field entry in a [`Descriptor`].
///
/// `name` is the declared field name used in store keys and lookup calls;
/// `serialized` is the JSON object key the field appears under (defaults to
/// the declared name, override with [`DescriptorBuilder::rename`]).
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub serialized: String,
    pub indexed: bool,
    pub enc_indexed: bool,
    pub unique: bool,
    pub secret: bool,
    pub auto_create_time: bool,
    pub auto_update_time: bool,
    pub default: Option<DefaultSpec>,
}

impl FieldDef {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            serialized: name.to_string(),
            indexed: false,
            enc_indexed: false,
            unique: false,
            secret: false,
            auto_create_time: false,
            auto_update_time: false,
            default: None,
        }
    }
}

/// Describes a record type: primary key, version counter, and categorized
/// fields. Built once per type with [`Descriptor::builder`] and cached by the
/// client keyed on the type's identity.
#[derive(Debug, Clone)]
pub struct Descriptor {
    name: String,
    group: Option<String>,
    auto_delete_ttl: Option<Duration>,
    pk: String,
    version: Option<String>,
    fields: Vec<FieldDef>,
}

impl Descriptor {
    /// Start building a descriptor for a model with the given name.
    pub fn builder(name: &str) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.to_string(),
            group: None,
            auto_delete_ttl: None,
            pk: None,
            version: None,
            fields: Vec::new(),
        }
    }

    /// The model name (used as the store key segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optional group name.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// The model segment for store keys: `<name>` or `<group>:<name>`.
    pub fn qualified_name(&self) -> String {
        match &self.group {
            Some(g) => format!("{g}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Default TTL applied by saves that pass no explicit TTL.
    pub fn auto_delete_ttl(&self) -> Option<Duration> {
        self.auto_delete_ttl
    }

    /// The declared name of the primary key field.
    pub fn primary_key(&self) -> &str {
        &self.pk
    }

    /// The declared name of the version field, if any.
    pub fn version_field(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// All field entries.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look up a field by its declared name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by declared name or serialized name (patch keys may
    /// use either).
    pub fn field_by_patch_name(&self, key: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == key || f.serialized == key)
    }

    /// The JSON object key a declared field serializes under. Falls back to
    /// the declared name for fields that were never registered.
    pub fn serialized_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.field(field).map_or(field, |f| f.serialized.as_str())
    }

    /// Serialized name of the primary key field.
    pub fn pk_serialized(&self) -> &str {
        self.serialized_name(&self.pk)
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.indexed)
    }

    pub fn enc_indexed_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.enc_indexed)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.unique)
    }

    pub fn secret_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.secret)
    }

    pub fn has_secret_fields(&self) -> bool {
        self.fields.iter().any(|f| f.secret)
    }
}

/// Builder for a [`Descriptor`].
///
/// Every category method declares the named field on first mention, so a
/// field may appear in several calls:
///
/// ```
/// use carmine_core::types::{DefaultSpec, Descriptor};
/// use serde_json::json;
///
/// let desc = Descriptor::builder("User")
///     .primary_key("id")
///     .version("version")
///     .secret("email")
///     .enc_indexed("email")
///     .unique("email")
///     .indexed("country")
///     .default_value("status", DefaultSpec::Literal(json!("pending")))
///     .auto_create_time("created_at")
///     .auto_update_time("updated_at")
///     .build()
///     .unwrap();
/// assert_eq!(desc.qualified_name(), "User");
/// ```
pub struct DescriptorBuilder {
    name: String,
    group: Option<String>,
    auto_delete_ttl: Option<Duration>,
    pk: Option<String>,
    version: Option<String>,
    fields: Vec<FieldDef>,
}

impl DescriptorBuilder {
    fn entry(&mut self, field: &str) -> &mut FieldDef {
        let pos = match self.fields.iter().position(|f| f.name == field) {
            Some(pos) => pos,
            None => {
                self.fields.push(FieldDef::new(field));
                self.fields.len() - 1
            }
        };
        &mut self.fields[pos]
    }

    /// Set the optional group name, prepended to the model segment in every
    /// store key.
    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    /// Default TTL for saves that pass no explicit TTL.
    pub fn auto_delete_ttl(mut self, ttl: Duration) -> Self {
        self.auto_delete_ttl = Some(ttl);
        self
    }

    /// Declare the primary key field. Without this call, a declared field
    /// named `id` (case-insensitive) is used.
    pub fn primary_key(mut self, field: &str) -> Self {
        self.entry(field);
        self.pk = Some(field.to_string());
        self
    }

    /// Declare the 64-bit integer version field. Without this call, a
    /// declared field named `version` (case-insensitive) is used when
    /// present.
    pub fn version(mut self, field: &str) -> Self {
        self.entry(field);
        self.version = Some(field.to_string());
        self
    }

    /// Maintain a plaintext equality index for the field.
    pub fn indexed(mut self, field: &str) -> Self {
        self.entry(field).indexed = true;
        self
    }

    /// Maintain an HMAC equality index for the field. The field must also be
    /// marked [`secret`](Self::secret) and must serialize to a string.
    pub fn enc_indexed(mut self, field: &str) -> Self {
        self.entry(field).enc_indexed = true;
        self
    }

    /// Enforce a uniqueness constraint on the field's value.
    pub fn unique(mut self, field: &str) -> Self {
        self.entry(field).unique = true;
        self
    }

    /// Encrypt the field at rest. Secret fields must serialize to strings.
    pub fn secret(mut self, field: &str) -> Self {
        self.entry(field).secret = true;
        self
    }

    /// Set the field to the current UTC time on first save, when zero-valued.
    pub fn auto_create_time(mut self, field: &str) -> Self {
        self.entry(field).auto_create_time = true;
        self
    }

    /// Set the field to the current UTC time on every save.
    pub fn auto_update_time(mut self, field: &str) -> Self {
        self.entry(field).auto_update_time = true;
        self
    }

    /// Fill the field with the given default when it is zero-valued at save
    /// time.
    pub fn default_value(mut self, field: &str, spec: DefaultSpec) -> Self {
        self.entry(field).default = Some(spec);
        self
    }

    /// Override the JSON object key the field serializes under (mirrors a
    /// serde rename on the record type).
    pub fn rename(mut self, field: &str, serialized: &str) -> Self {
        self.entry(field).serialized = serialized.to_string();
        self
    }

    /// Validate and build the descriptor.
    pub fn build(self) -> Result<Descriptor, ContractError> {
        let Self {
            name,
            group,
            auto_delete_ttl,
            pk,
            version,
            fields,
        } = self;

        for f in &fields {
            if f.name.is_empty() {
                return Err(ContractError::EmptyFieldName {
                    model: name.clone(),
                });
            }
            if f.indexed && f.enc_indexed {
                return Err(ContractError::IndexedAndEncIndexed {
                    field: f.name.clone(),
                });
            }
            if f.enc_indexed && !f.secret {
                return Err(ContractError::EncIndexWithoutSecret {
                    field: f.name.clone(),
                });
            }
        }

        let pk = pk
            .or_else(|| {
                fields
                    .iter()
                    .find(|f| f.name.eq_ignore_ascii_case("id"))
                    .map(|f| f.name.clone())
            })
            .ok_or_else(|| ContractError::MissingPrimaryKey {
                model: name.clone(),
            })?;

        let version = version.or_else(|| {
            fields
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case("version"))
                .map(|f| f.name.clone())
        });

        Ok(Descriptor {
            name,
            group,
            auto_delete_ttl,
            pk,
            version,
            fields,
        })
    }
}

/// Whether a JSON value counts as "zero" for default and auto-create-time
/// purposes: null, empty string, numeric zero, or false.
pub fn is_zero_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Bool(b) => !b,
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
    }
}
