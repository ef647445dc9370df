// Table definitions and the DDL generated from them.

use super::quote_ident;
use crate::database::Database;
use crate::error::Result;

/// Schema definition for a set of tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }
    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Composite primary key; leave empty to use per-column constraints.
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }
    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }
    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// `CREATE TABLE IF NOT EXISTS` for this table in `schema`.
    pub fn create_sql(&self, schema: Option<&str>) -> Result<String> {
        let mut parts = Vec::with_capacity(self.columns.len() + self.foreign_keys.len() + 1);
        for column in &self.columns {
            parts.push(column.sql(self.primary_key.is_empty())?);
        }
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", quote_list(&self.primary_key)?));
        }
        for fk in &self.foreign_keys {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {} ON UPDATE {}",
                quote_ident(&fk.column)?,
                quote_ident(&fk.foreign_table)?,
                quote_ident(&fk.foreign_column)?,
                fk.on_delete.as_sql(),
                fk.on_update.as_sql()
            ));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            super::qualified(schema, &self.name)?,
            parts.join(", ")
        ))
    }

    /// One `CREATE INDEX IF NOT EXISTS` per declared index.
    pub fn index_sql(&self, schema: Option<&str>) -> Result<Vec<String>> {
        self.indexes
            .iter()
            .map(|index| {
                Ok(format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    super::qualified(schema, &index.name)?,
                    quote_ident(&self.name)?,
                    quote_list(&index.columns)?
                ))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
        }
    }
    pub fn with_constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
    pub fn with_default(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    fn sql(&self, allow_primary_key: bool) -> Result<String> {
        let mut sql = format!("{} {}", quote_ident(&self.name)?, self.data_type.as_sql());
        for constraint in &self.constraints {
            match constraint {
                ColumnConstraint::PrimaryKey if !allow_primary_key => continue,
                ColumnConstraint::PrimaryKey => sql.push_str(" PRIMARY KEY"),
                ColumnConstraint::NotNull => sql.push_str(" NOT NULL"),
                ColumnConstraint::Unique => sql.push_str(" UNIQUE"),
            }
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.as_sql());
        }
        Ok(sql)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
    Boolean,
}

impl DataType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            DataType::Integer | DataType::Boolean => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    fn as_sql(&self) -> String {
        match self {
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Text(t) => format!("'{}'", t.replace('\'', "''")),
            DefaultValue::Real(f) => format!("({})", f),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl ForeignKeyAction {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
            ForeignKeyAction::Restrict => "RESTRICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

fn quote_list(names: &[String]) -> Result<String> {
    Ok(names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// Create every table and index of `schema` that does not exist yet, in
/// one transaction.
pub fn apply_schema(db: &Database, schema: &Schema) -> Result<()> {
    let mut statements = Vec::new();
    for table in &schema.tables {
        statements.push(table.create_sql(None)?);
        statements.extend(table.index_sql(None)?);
    }
    db.with_connection_mut(|conn| {
        let tx = conn.transaction()?;
        for sql in &statements {
            tx.execute(sql, [])?;
        }
        tx.commit()?;
        Ok(())
    })
}

/// Drop `table` if present and create it afresh from its definition.
pub fn create_table(db: &Database, schema: Option<&str>, table: &TableDefinition) -> Result<()> {
    let drop = format!("DROP TABLE IF EXISTS {}", super::qualified(schema, &table.name)?);
    let create = table.create_sql(schema)?;
    let indexes = table.index_sql(schema)?;
    db.with_connection_mut(|conn| {
        let tx = conn.transaction()?;
        tx.execute(&drop, [])?;
        tx.execute(&create, [])?;
        for sql in &indexes {
            tx.execute(sql, [])?;
        }
        tx.commit()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sql() {
        let table = TableDefinition::new("orders")
            .with_column(
                ColumnDefinition::new("id", DataType::Integer)
                    .with_constraint(ColumnConstraint::PrimaryKey),
            )
            .with_column(
                ColumnDefinition::new("note", DataType::Text)
                    .with_constraint(ColumnConstraint::NotNull)
                    .with_default(DefaultValue::Text("n/a".into())),
            )
            .with_column(ColumnDefinition::new("user_id", DataType::Integer))
            .with_foreign_key(ForeignKey {
                column: "user_id".into(),
                foreign_table: "users".into(),
                foreign_column: "id".into(),
                on_delete: ForeignKeyAction::Cascade,
                on_update: ForeignKeyAction::NoAction,
            })
            .with_index(IndexDefinition {
                name: "orders_user".into(),
                columns: vec!["user_id".into()],
                unique: false,
            });

        assert_eq!(
            table.create_sql(None).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"main\".\"orders\" (\"id\" INTEGER PRIMARY KEY, \
             \"note\" TEXT NOT NULL DEFAULT 'n/a', \"user_id\" INTEGER, \
             FOREIGN KEY (\"user_id\") REFERENCES \"users\"(\"id\") ON DELETE CASCADE ON UPDATE NO ACTION)"
        );
        assert_eq!(
            table.index_sql(Some("aux")).unwrap(),
            vec!["CREATE INDEX IF NOT EXISTS \"aux\".\"orders_user\" ON \"orders\" (\"user_id\")"]
        );
    }

    #[test]
    fn test_composite_key_overrides_column_key() {
        let table = TableDefinition::new("pairs")
            .with_column(
                ColumnDefinition::new("a", DataType::Text)
                    .with_constraint(ColumnConstraint::PrimaryKey),
            )
            .with_column(ColumnDefinition::new("b", DataType::Text))
            .with_primary_key(&["a", "b"]);
        let sql = table.create_sql(None).unwrap();
        assert!(sql.contains("\"a\" TEXT, \"b\" TEXT, PRIMARY KEY (\"a\", \"b\")"));
    }
}
