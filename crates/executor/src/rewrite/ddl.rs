//! DDL lowering: declared types map onto host affinities (everything
//! without a native counterpart stores as encoded TEXT), PRIMARY KEY is
//! forwarded, TEMP tables land in the host's connection-private schema.

use skiffql_common::{Error, Result};
use skiffql_core::{DataType, StructField};
use sqlparser::ast;

use super::{object_name_parts, quote_ident};
use crate::catalog::{ColumnDef, TableDef};

/// Maps a parsed type onto the engine's logical types.
pub fn convert_type(parsed: &ast::DataType) -> Result<DataType> {
    use ast::DataType as T;
    Ok(match parsed {
        T::Bool | T::Boolean => DataType::Bool,
        T::Int64
        | T::Int(_)
        | T::Integer(_)
        | T::BigInt(_)
        | T::SmallInt(_)
        | T::TinyInt(_) => DataType::Int64,
        T::Float64 | T::Float(_) | T::Double(_) | T::DoublePrecision | T::Real => {
            DataType::Float64
        }
        T::Numeric(_) | T::Decimal(_) | T::Dec(_) => DataType::Numeric,
        T::BigNumeric(_) | T::BigDecimal(_) => DataType::BigNumeric,
        T::String(_) | T::Text | T::Varchar(_) | T::Char(_) | T::CharacterVarying(_) => {
            DataType::String
        }
        T::Bytes(_) | T::Binary(_) | T::Varbinary(_) | T::Blob(_) => DataType::Bytes,
        T::Date => DataType::Date,
        T::Datetime(_) => DataType::DateTime,
        T::Time(_, _) => DataType::Time,
        T::Timestamp(_, _) => DataType::Timestamp,
        T::Interval => DataType::Interval,
        T::JSON => DataType::Json,
        T::AnyType => DataType::Unknown,
        T::Array(elem) => match elem {
            ast::ArrayElemTypeDef::AngleBracket(inner)
            | ast::ArrayElemTypeDef::SquareBracket(inner, _)
            | ast::ArrayElemTypeDef::Parenthesis(inner) => {
                DataType::Array(Box::new(convert_type(inner)?))
            }
            ast::ArrayElemTypeDef::None => DataType::Array(Box::new(DataType::Unknown)),
        },
        T::Struct(fields, _) => DataType::Struct(
            fields
                .iter()
                .map(|f| {
                    Ok(StructField {
                        name: f
                            .field_name
                            .as_ref()
                            .map(|i| i.value.clone())
                            .unwrap_or_default(),
                        data_type: convert_type(&f.field_type)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            return Err(Error::analyze(format!("unsupported type {}", other)));
        }
    })
}

/// Builds the catalog entry for a CREATE TABLE statement.
pub fn table_def_from_create(create: &ast::CreateTable) -> Result<TableDef> {
    let path = object_name_parts(&create.name);
    let mut primary_key = Vec::new();
    let mut columns = Vec::with_capacity(create.columns.len());
    for column in &create.columns {
        let mut not_null = false;
        for option in &column.options {
            match &option.option {
                ast::ColumnOption::NotNull => not_null = true,
                ast::ColumnOption::Unique { is_primary: true, .. } => {
                    primary_key.push(column.name.value.clone());
                }
                _ => {}
            }
        }
        columns.push(ColumnDef {
            name: column.name.value.clone(),
            data_type: convert_type(&column.data_type)?,
            not_null,
        });
    }
    for constraint in &create.constraints {
        if let ast::TableConstraint::PrimaryKey { columns: keys, .. } = constraint {
            for key in keys {
                primary_key.push(key.value.clone());
            }
        }
    }
    Ok(TableDef {
        path,
        columns,
        primary_key,
        temp: create.temporary,
    })
}

/// The host-store CREATE statement for a declared schema.
pub fn create_table_ddl(def: &TableDef) -> String {
    let mut parts: Vec<String> = def
        .columns
        .iter()
        .map(|column| {
            let mut sql = format!(
                "{} {}",
                quote_ident(&column.name),
                column.data_type.host_affinity()
            );
            if column.not_null {
                sql.push_str(" NOT NULL");
            }
            sql
        })
        .collect();
    if !def.primary_key.is_empty() {
        let keys: Vec<String> = def.primary_key.iter().map(|k| quote_ident(k)).collect();
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    format!(
        "CREATE {}TABLE {} ({})",
        if def.temp { "TEMP " } else { "" },
        quote_ident(&def.internal_name()),
        parts.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_types_store_as_text() {
        let parsed = ast::DataType::Struct(vec![], ast::StructBracketKind::AngleBrackets);
        let converted = convert_type(&parsed).unwrap();
        assert_eq!(converted.host_affinity(), "TEXT");
    }
}
