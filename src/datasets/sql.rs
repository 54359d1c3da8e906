/// SQL text for dataset builds
///
/// Every identifier that reaches SQL comes from config or from a source's
/// header row, so it is always double-quoted with embedded quotes doubled.

use crate::definitions::types::Dataset;

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE` for an untyped staging table
pub fn create_staging_table(table: &str, columns: &[String]) -> String {
    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "))
}

/// The statement that materializes a dataset from its staged sources
///
/// Joins are applied left to right. A `left_column` written as
/// `source.column` refers to an earlier source; a bare name refers to the
/// primary source.
pub fn materialize_query(dataset: &Dataset) -> String {
    let primary = &dataset.data_source.id;
    let mut earlier: Vec<&str> = vec![primary.as_str()];
    let mut sql = format!(
        "CREATE TABLE {} AS SELECT * FROM {}",
        quote_ident(&dataset.id),
        quote_ident(primary)
    );

    for join in &dataset.joins {
        let source = &join.data_source.id;
        let conditions: Vec<String> = join
            .columns
            .iter()
            .map(|pair| {
                format!(
                    "{} = {}.{}",
                    qualify_left(primary, &earlier, &pair.left_column),
                    quote_ident(source),
                    quote_ident(&pair.right_column)
                )
            })
            .collect();
        sql.push_str(&format!(
            " {} JOIN {} ON {}",
            join.kind.keyword(),
            quote_ident(source),
            conditions.join(" AND ")
        ));
        earlier.push(source);
    }

    sql
}

fn qualify_left(primary: &str, earlier: &[&str], column: &str) -> String {
    if let Some((table, name)) = column.split_once('.') {
        if earlier.contains(&table) {
            return format!("{}.{}", quote_ident(table), quote_ident(name));
        }
    }
    format!("{}.{}", quote_ident(primary), quote_ident(column))
}
