/*!
 * 数据库表结构定义
 *
 * 用显式的表/列描述符代替继承式的 ORM 基类：
 * 每个实体通过 `Entity::table()` 给出自己完整的列清单，
 * 主键、时间戳等通用列由 `ColumnDef` 上的构造函数提供，由实体自行列出。
 *
 * 当前应用尚未定义任何表，`Schema::registered()` 为空。
 */

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Text,
    Real,
    Blob,
    Boolean,
    Timestamp,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::Text => write!(f, "TEXT"),
            SqlType::Real => write!(f, "REAL"),
            SqlType::Blob => write!(f, "BLOB"),
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub nullable: bool,
    pub default: Option<&'static str>,
}

impl ColumnDef {
    /// A nullable column without default.
    pub fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            primary_key: false,
            auto_increment: false,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_sql(mut self, expression: &'static str) -> Self {
        self.default = Some(expression);
        self
    }

    /// Auto-incrementing integer primary key named `id`.
    pub fn id() -> Self {
        Self {
            name: "id",
            sql_type: SqlType::Integer,
            primary_key: true,
            auto_increment: true,
            nullable: false,
            default: None,
        }
    }

    pub fn created_at() -> Self {
        Self::new("created_at", SqlType::Timestamp)
            .not_null()
            .default_sql("CURRENT_TIMESTAMP")
    }

    /// Defaults to insert time; callers set it explicitly on update.
    pub fn updated_at() -> Self {
        Self::new("updated_at", SqlType::Timestamp)
            .not_null()
            .default_sql("CURRENT_TIMESTAMP")
    }

    fn definition_sql(&self) -> String {
        let mut sql = format!("\"{}\" {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.auto_increment {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if !self.nullable && !self.primary_key {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            sql.push_str(&format!(" DEFAULT ({})", default));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// `CREATE TABLE IF NOT EXISTS`, so running it against an existing
    /// table leaves that table untouched.
    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(ColumnDef::definition_sql)
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", self.name, columns)
    }
}

/// A persisted entity describes its own table.
pub trait Entity {
    fn table() -> TableDef;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every table the application owns. Currently none.
    pub fn registered() -> Self {
        Self::new()
    }

    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn entity<E: Entity>(self) -> Self {
        self.table(E::table())
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
