//! Declarative service contracts.
//!
//! An RPC surface is declared as a set of [`InterfaceDecl`]s, either built in
//! code or loaded from a YAML manifest:
//!
//! ```yaml
//! interfaces:
//!   - type: IUserQueries
//!     services:
//!       - category: users
//!         version: v1
//!         name: queries
//!         sql:
//!           connection: main
//!           textProcessor: query-macros
//!     methods:
//!       - name: GetUser
//!         returns: Optional<User>
//!         command:
//!           kind: query
//!           text: "SELECT {qualify u [id, name]} FROM users u WHERE u.id = @id"
//!         parameters:
//!           - name: id
//!             descriptor: { dbType: int }
//! ```
//!
//! Declarations are plain data. Nothing here is validated; that is the job
//! of [`crate::validate::Validator`], which turns declarations into cached
//! `Valid*` descriptors on first use.

pub mod value;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use value::ParamValue;

/// The (category, version, name) identity of a declared RPC interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub category: String,
    pub version: String,
    pub name: String,
}

impl ServiceDescriptor {
    pub fn new(
        category: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            version: version.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive match against a routed (category, version, name).
    pub fn matches(&self, category: &str, version: &str, name: &str) -> bool {
        self.category.eq_ignore_ascii_case(category)
            && self.version.eq_ignore_ascii_case(version)
            && self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.version, self.name)
    }
}

/// Interface-level defaults for the database-command family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlServiceDecl {
    /// Default logical connection name for every method of the interface.
    #[serde(default)]
    pub connection: Option<String>,
    /// Default text processor applied to command text.
    #[serde(default)]
    pub text_processor: Option<String>,
}

/// A service descriptor as attached to an interface declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDecl {
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,
    /// Present for database-command services, absent for plain-method ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlServiceDecl>,
}

impl ServiceDecl {
    pub fn json(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            sql: None,
        }
    }

    pub fn sql(descriptor: ServiceDescriptor, sql: SqlServiceDecl) -> Self {
        Self {
            descriptor,
            sql: Some(sql),
        }
    }

    pub fn kind(&self) -> ServiceKind<'_> {
        match &self.sql {
            Some(sql) => ServiceKind::Sql(sql),
            None => ServiceKind::Json,
        }
    }
}

/// Dispatch family of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind<'a> {
    /// Methods are backed by registered implementation closures.
    Json,
    /// Methods are declarative database commands.
    Sql(&'a SqlServiceDecl),
}

/// Whether a declared type is an interface or something else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    #[default]
    Interface,
    Class,
    Struct,
}

/// A declared service contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceDecl {
    /// Unique type name, e.g. `IUserQueries`.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub kind: TypeKind,
    /// Attached service descriptors; validation requires exactly one.
    #[serde(default)]
    pub services: Vec<ServiceDecl>,
    /// Type names of extended interfaces.
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

impl InterfaceDecl {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: TypeKind::Interface,
            services: Vec::new(),
            extends: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: TypeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn service(mut self, service: ServiceDecl) -> Self {
        self.services.push(service);
        self
    }

    pub fn extends(mut self, type_name: impl Into<String>) -> Self {
        self.extends.push(type_name.into());
        self
    }

    pub fn method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }

    /// The single attached service descriptor, if exactly one is present.
    pub fn single_service(&self) -> Option<&ServiceDecl> {
        match self.services.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// HTTP verb a method must be invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn matches(&self, method: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(method)
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported HTTP method '{}'", other)),
        }
    }
}

impl TryFrom<String> for HttpVerb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpVerb> for String {
    fn from(verb: HttpVerb) -> Self {
        verb.as_str().to_string()
    }
}

/// Kind of database command; decides the transport verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    #[default]
    Query,
    Insert,
    Update,
    Delete,
    Execute,
}

impl CommandKind {
    pub fn verb(&self) -> HttpVerb {
        match self {
            Self::Query => HttpVerb::Get,
            _ => HttpVerb::Post,
        }
    }

    pub fn has_side_effects(&self) -> bool {
        !matches!(self, Self::Query)
    }
}

/// Method-level descriptor for the database-command family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDecl {
    #[serde(default)]
    pub kind: CommandKind,
    /// Inline command text, possibly containing `{...}` macros.
    pub text: String,
    /// Overrides the interface's default connection name.
    #[serde(default)]
    pub connection: Option<String>,
    /// Overrides the interface's default text processor.
    #[serde(default)]
    pub text_processor: Option<String>,
}

impl CommandDecl {
    pub fn new(kind: CommandKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            connection: None,
            text_processor: None,
        }
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self::new(CommandKind::Query, text)
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn text_processor(mut self, name: impl Into<String>) -> Self {
        self.text_processor = Some(name.into());
        self
    }
}

/// A declared method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDecl {
    pub name: String,
    /// Declared return type, e.g. `List<User>`, `Optional<int>`, `Effect`.
    #[serde(default = "default_returns")]
    pub returns: String,
    #[serde(default)]
    pub parameters: Vec<ParamDecl>,
    /// Transport verb for plain-method services.
    #[serde(default)]
    pub http: Option<HttpVerb>,
    /// Command descriptor for database-command services.
    #[serde(default)]
    pub command: Option<CommandDecl>,
}

fn default_returns() -> String {
    "Json".to_string()
}

impl MethodDecl {
    pub fn new(name: impl Into<String>, returns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            returns: returns.into(),
            parameters: Vec::new(),
            http: None,
            command: None,
        }
    }

    pub fn http(mut self, verb: HttpVerb) -> Self {
        self.http = Some(verb);
        self
    }

    pub fn command(mut self, command: CommandDecl) -> Self {
        self.command = Some(command);
        self
    }

    pub fn param(mut self, param: ParamDecl) -> Self {
        self.parameters.push(param);
        self
    }

    /// The transport verb carried by whichever method-kind descriptor is present.
    pub fn verb(&self) -> Option<HttpVerb> {
        self.http
            .or_else(|| self.command.as_ref().map(|c| c.kind.verb()))
    }

    /// Parameter types plus return type; two declarations with the same name
    /// and signature are the same method.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                let ty = match (&p.descriptor, &p.value_type) {
                    (Some(d), _) => d.type_name(),
                    (None, Some(vt)) => vt.clone(),
                    (None, None) => "?".to_string(),
                };
                if p.optional {
                    format!("{}?", ty)
                } else {
                    ty
                }
            })
            .collect();
        format!("({}) -> {}", params.join(", "), self.returns.trim())
    }
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDecl {
    pub name: String,
    /// Named value type whose registered descriptor applies when the
    /// parameter carries none of its own.
    #[serde(default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub descriptor: Option<ParamDescriptor>,
    #[serde(default)]
    pub optional: bool,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, descriptor: ParamDescriptor) -> Self {
        Self {
            name: name.into(),
            value_type: None,
            descriptor: Some(descriptor),
            optional: false,
        }
    }

    pub fn of_type(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: Some(value_type.into()),
            descriptor: None,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Value-domain and storage constraints of one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDescriptor {
    pub db_type: DbType,
    /// Bound parameter name override (defaults to `@<param>`).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    /// Declared size; negative means `max`.
    #[serde(default)]
    pub size: Option<i32>,
    #[serde(default)]
    pub scale: Option<u8>,
    #[serde(default)]
    pub precision: Option<u8>,
}

impl ParamDescriptor {
    pub fn new(db_type: DbType) -> Self {
        Self {
            db_type,
            name: None,
            nullable: false,
            size: None,
            scale: None,
            precision: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }

    /// `decimal(precision, scale)`.
    pub fn precision_scale(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn domain(&self) -> ValueDomain {
        self.db_type.domain()
    }

    /// Whether a JSON `null` is an acceptable value.
    pub fn accepts_null(&self) -> bool {
        self.nullable || self.domain().is_reference()
    }

    /// T-SQL style rendering of the type constraint, e.g. `nvarchar(max)`.
    pub fn type_name(&self) -> String {
        let sized = |base: &str| match self.size {
            Some(v) if v < 0 => format!("{}(max)", base),
            Some(v) => format!("{}({})", base, v),
            None => base.to_string(),
        };
        match self.db_type {
            DbType::VarChar => sized("varchar"),
            DbType::NVarChar => sized("nvarchar"),
            DbType::Char => sized("char"),
            DbType::NChar => sized("nchar"),
            DbType::VarBinary => sized("varbinary"),
            DbType::Binary => sized("binary"),
            DbType::Decimal => match (self.precision, self.scale) {
                (Some(p), Some(s)) => format!("decimal({},{})", p, s),
                (Some(p), None) => format!("decimal({})", p),
                _ => "decimal".to_string(),
            },
            other => other.as_str().to_string(),
        }
    }
}

/// Storage type of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Int,
    BigInt,
    SmallInt,
    TinyInt,
    Bit,
    Float,
    Real,
    Decimal,
    Money,
    SmallMoney,
    Char,
    NChar,
    VarChar,
    NVarChar,
    Text,
    NText,
    Date,
    DateTime,
    DateTime2,
    DateTimeOffset,
    UniqueIdentifier,
    Binary,
    VarBinary,
    Timestamp,
    Variant,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::SmallInt => "smallint",
            Self::TinyInt => "tinyint",
            Self::Bit => "bit",
            Self::Float => "float",
            Self::Real => "real",
            Self::Decimal => "decimal",
            Self::Money => "money",
            Self::SmallMoney => "smallmoney",
            Self::Char => "char",
            Self::NChar => "nchar",
            Self::VarChar => "varchar",
            Self::NVarChar => "nvarchar",
            Self::Text => "text",
            Self::NText => "ntext",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
            Self::UniqueIdentifier => "uniqueidentifier",
            Self::Binary => "binary",
            Self::VarBinary => "varbinary",
            Self::Timestamp => "timestamp",
            Self::Variant => "variant",
        }
    }

    pub fn domain(&self) -> ValueDomain {
        match self {
            Self::Int => ValueDomain::Int32,
            Self::BigInt => ValueDomain::Int64,
            Self::SmallInt => ValueDomain::Int16,
            Self::TinyInt => ValueDomain::Byte,
            Self::Bit => ValueDomain::Bool,
            Self::Float => ValueDomain::Double,
            Self::Real => ValueDomain::Single,
            Self::Decimal | Self::Money | Self::SmallMoney => ValueDomain::Decimal,
            Self::Char | Self::NChar | Self::VarChar | Self::NVarChar | Self::Text | Self::NText => {
                ValueDomain::String
            }
            Self::Date | Self::DateTime | Self::DateTime2 => ValueDomain::DateTime,
            Self::DateTimeOffset => ValueDomain::DateTimeOffset,
            Self::UniqueIdentifier => ValueDomain::Guid,
            Self::Binary | Self::VarBinary | Self::Timestamp => ValueDomain::Bytes,
            Self::Variant => ValueDomain::Json,
        }
    }
}

/// Semantic type a JSON request value is decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueDomain {
    String,
    Int32,
    Int64,
    Int16,
    Byte,
    Bool,
    Double,
    Single,
    Decimal,
    DateTime,
    DateTimeOffset,
    Guid,
    Bytes,
    Json,
}

impl ValueDomain {
    /// Domains whose absence of value is representable without nullability.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::String | Self::Bytes | Self::Json)
    }
}

/// The three result shapes of a database-command method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    List,
    Optional,
    Effect,
}

/// A parsed declared return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnType {
    pub shape: ResultShape,
    /// Row type for `List`/`Optional`; `None` for `Effect`.
    pub row_type: Option<String>,
}

impl ReturnType {
    /// Parse `List<T>`, `Optional<T>` (or `Maybe<T>`/`Option<T>`/`Vec<T>`),
    /// and `Effect` (or `CommandResult`). Anything else is `None`.
    pub fn parse(declared: &str) -> Option<Self> {
        let declared = declared.trim();
        if declared == "Effect" || declared == "CommandResult" {
            return Some(Self {
                shape: ResultShape::Effect,
                row_type: None,
            });
        }

        let open = declared.find('<')?;
        if !declared.ends_with('>') {
            return None;
        }
        let wrapper = declared[..open].trim();
        let inner = declared[open + 1..declared.len() - 1].trim();
        if inner.is_empty() || inner.contains('<') || inner.contains(',') {
            return None;
        }

        let shape = match wrapper {
            "List" | "Vec" => ResultShape::List,
            "Optional" | "Maybe" | "Option" => ResultShape::Optional,
            _ => return None,
        };
        Some(Self {
            shape,
            row_type: Some(inner.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_return_shapes() {
        let list = ReturnType::parse("List<User>").unwrap();
        assert_eq!(list.shape, ResultShape::List);
        assert_eq!(list.row_type.as_deref(), Some("User"));

        let opt = ReturnType::parse(" Maybe< int? > ").unwrap();
        assert_eq!(opt.shape, ResultShape::Optional);
        assert_eq!(opt.row_type.as_deref(), Some("int?"));

        let effect = ReturnType::parse("CommandResult").unwrap();
        assert_eq!(effect.shape, ResultShape::Effect);
        assert!(effect.row_type.is_none());
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(ReturnType::parse("int").is_none());
        assert!(ReturnType::parse("Dictionary<string, int>").is_none());
        assert!(ReturnType::parse("List<List<int>>").is_none());
        assert!(ReturnType::parse("Set<int>").is_none());
    }

    #[test]
    fn test_type_name_rendering() {
        assert_eq!(ParamDescriptor::new(DbType::Int).type_name(), "int");
        assert_eq!(
            ParamDescriptor::new(DbType::NVarChar).size(-1).type_name(),
            "nvarchar(max)"
        );
        assert_eq!(
            ParamDescriptor::new(DbType::VarChar).size(50).type_name(),
            "varchar(50)"
        );
    }

    #[test]
    fn test_command_kind_verbs() {
        assert_eq!(CommandKind::Query.verb(), HttpVerb::Get);
        assert_eq!(CommandKind::Insert.verb(), HttpVerb::Post);
        assert!(CommandKind::Update.has_side_effects());
        assert!(!CommandKind::Query.has_side_effects());
    }

    #[test]
    fn test_deserialize_interface_from_yaml() {
        let yaml = r#"
type: IUsers
services:
  - category: users
    version: v1
    name: queries
    sql:
      connection: main
methods:
  - name: GetUser
    returns: Optional<User>
    command:
      text: "SELECT id FROM users WHERE id = @id"
    parameters:
      - name: id
        descriptor: { dbType: int }
"#;
        let decl: InterfaceDecl = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(decl.type_name, "IUsers");
        assert_eq!(decl.kind, TypeKind::Interface);
        let service = decl.single_service().unwrap();
        assert!(matches!(service.kind(), ServiceKind::Sql(s) if s.connection.as_deref() == Some("main")));
        assert_eq!(decl.methods[0].verb(), Some(HttpVerb::Get));
        assert_eq!(
            decl.methods[0].parameters[0].descriptor.as_ref().unwrap().db_type,
            DbType::Int
        );
    }
}
