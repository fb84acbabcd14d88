//! Revision bookkeeping SQL generator: builds the identifiers and statement
//! bodies for a cluster's per-host-type revision tables (`ensure_*`,
//! `guard_*`, `clean_*`, `push_*`, `drop_*`, `arch_*`, `fetch_*`).

use crate::pg_literal::{pg_dollar_quote, pg_ident_quote, pg_quote};

fn application_ident(application: &str) -> String {
    application.replace('-', "_").to_lowercase()
}

fn revision_schema_ident(app_ident: &str) -> String {
    format!("{app_ident}_revision")
}

fn ht_ident(app_ident: &str, host_type: &str) -> String {
    format!("{}_{}", app_ident, host_type.replace('-', "_").to_lowercase())
}

/// Generates bookkeeping SQL for a single `application`, scoped by
/// `host_type` per call.
#[derive(Debug, Clone)]
pub struct RevisionSql {
    application: String,
}

impl RevisionSql {
    pub fn new(application: impl Into<String>) -> Self {
        RevisionSql { application: application.into() }
    }

    fn app_ident(&self) -> String {
        application_ident(&self.application)
    }

    fn schema_ident(&self) -> String {
        revision_schema_ident(&self.app_ident())
    }

    fn var_revision_ident(&self, host_type: &str) -> String {
        format!("{}_var_revision", ht_ident(&self.app_ident(), host_type))
    }

    fn func_revision_ident(&self, host_type: &str) -> String {
        format!("{}_func_revision", ht_ident(&self.app_ident(), host_type))
    }

    fn var_history_ident(&self, host_type: &str) -> String {
        format!("{}_var_revision_history", ht_ident(&self.app_ident(), host_type))
    }

    fn func_history_ident(&self, host_type: &str) -> String {
        format!("{}_func_revision_history", ht_ident(&self.app_ident(), host_type))
    }

    pub fn ensure_revision_structs(&self, host_type: &str) -> String {
        let q_schema = pg_ident_quote(&self.schema_ident());
        let q_var = pg_ident_quote(&self.var_revision_ident(host_type));
        let q_func = pg_ident_quote(&self.func_revision_ident(host_type));
        let q_var_hist = pg_ident_quote(&self.var_history_ident(host_type));
        let q_func_hist = pg_ident_quote(&self.func_history_ident(host_type));

        format!(
            "create schema if not exists {q_schema};\n\
             create table if not exists {q_schema}.{q_var} (\n\
             application text not null, schemas_type text not null, revision text not null,\n\
             comment text, schemas text[], datetime timestamptz not null default now(),\n\
             primary key (application, schemas_type)\n\
             );\n\
             create table if not exists {q_schema}.{q_func} (\n\
             application text not null, schemas_type text not null, revision text not null,\n\
             comment text, schemas text[], datetime timestamptz not null default now(),\n\
             primary key (application, schemas_type)\n\
             );\n\
             create table if not exists {q_schema}.{q_var_hist} (\n\
             id bigserial primary key, application text not null, schemas_type text not null,\n\
             revision text not null, comment text, schemas text[], datetime timestamptz not null default now()\n\
             );\n\
             create table if not exists {q_schema}.{q_func_hist} (\n\
             id bigserial primary key, application text not null, schemas_type text not null,\n\
             revision text not null, comment text, schemas text[], datetime timestamptz not null default now()\n\
             );\n"
        )
    }

    fn guard_revision(&self, host_type: &str, schemas_type: &str, table_ident: &str, expected: Option<&str>) -> String {
        let q_schema = pg_ident_quote(&self.schema_ident());
        let q_table = pg_ident_quote(table_ident);
        let q_app = pg_quote(Some(&self.application));
        let q_schemas_type = pg_quote(Some(schemas_type));
        let q_expected = pg_quote(expected);
        let _ = host_type;

        let body = format!(
            "declare\n  current_revision text;\nbegin\n  select revision into current_revision\n  \
             from {q_schema}.{q_table}\n  where application = {q_app} and schemas_type = {q_schemas_type}\n  \
             for update;\n\n  if current_revision is distinct from {q_expected} then\n    \
             raise exception 'revision guard failed for %: expected %, found %', {q_app}, {q_expected}, current_revision;\n  \
             end if;\nend;\n"
        );

        format!("do {};\n", pg_dollar_quote("do", Some(&body)))
    }

    pub fn guard_var_revision(&self, host_type: &str, schemas_type: &str, expected: Option<&str>) -> String {
        self.guard_revision(host_type, schemas_type, &self.var_revision_ident(host_type), expected)
    }

    pub fn guard_func_revision(&self, host_type: &str, schemas_type: &str, expected: Option<&str>) -> String {
        self.guard_revision(host_type, schemas_type, &self.func_revision_ident(host_type), expected)
    }

    fn clean_revision(&self, table_ident: &str, schemas_type: &str) -> String {
        let q_schema = pg_ident_quote(&self.schema_ident());
        let q_table = pg_ident_quote(table_ident);
        let q_app = pg_quote(Some(&self.application));
        let q_schemas_type = pg_quote(Some(schemas_type));
        format!("delete from {q_schema}.{q_table} where application = {q_app} and schemas_type = {q_schemas_type};\n")
    }

    pub fn clean_var_revision(&self, host_type: &str, schemas_type: &str) -> String {
        self.clean_revision(&self.var_revision_ident(host_type), schemas_type)
    }

    pub fn clean_func_revision(&self, host_type: &str, schemas_type: &str) -> String {
        self.clean_revision(&self.func_revision_ident(host_type), schemas_type)
    }

    fn push_revision(
        &self,
        table_ident: &str,
        history_ident: &str,
        schemas_type: &str,
        revision: &str,
        comment: Option<&str>,
        schemas: &[String],
    ) -> String {
        let q_schema = pg_ident_quote(&self.schema_ident());
        let q_table = pg_ident_quote(table_ident);
        let q_history = pg_ident_quote(history_ident);
        let q_app = pg_quote(Some(&self.application));
        let q_schemas_type = pg_quote(Some(schemas_type));
        let q_revision = pg_quote(Some(revision));
        let q_comment = pg_quote(comment);
        let q_schemas = pg_text_array(schemas);

        format!(
            "with upsert as (\n  insert into {q_schema}.{q_table} (application, schemas_type, revision, comment, schemas, datetime)\n  \
             values ({q_app}, {q_schemas_type}, {q_revision}, {q_comment}, {q_schemas}, now())\n  \
             on conflict (application, schemas_type) do update set\n    revision = excluded.revision, comment = excluded.comment,\n    \
             schemas = excluded.schemas, datetime = excluded.datetime\n  returning application, schemas_type, revision, comment, schemas, datetime\n)\n\
             insert into {q_schema}.{q_history} (application, schemas_type, revision, comment, schemas, datetime)\n\
             select application, schemas_type, revision, comment, schemas, datetime from upsert;\n"
        )
    }

    pub fn push_var_revision(&self, host_type: &str, schemas_type: &str, revision: &str, comment: Option<&str>, schemas: &[String]) -> String {
        self.push_revision(&self.var_revision_ident(host_type), &self.var_history_ident(host_type), schemas_type, revision, comment, schemas)
    }

    pub fn push_func_revision(&self, host_type: &str, schemas_type: &str, revision: &str, comment: Option<&str>, schemas: &[String]) -> String {
        self.push_revision(&self.func_revision_ident(host_type), &self.func_history_ident(host_type), schemas_type, revision, comment, schemas)
    }

    fn drop_schemas(&self, table_ident: &str, schemas_type: &str, schemas: &[String], cascade: bool) -> String {
        let q_schema = pg_ident_quote(&self.schema_ident());
        let q_table = pg_ident_quote(table_ident);
        let q_app = pg_quote(Some(&self.application));
        let q_schemas_type = pg_quote(Some(schemas_type));
        let q_schemas = pg_text_array(schemas);
        let cascade_kw = if cascade { " cascade" } else { "" };

        let body = format!(
            "declare\n  recorded text[];\n  name text;\nbegin\n  select schemas into recorded\n  \
             from {q_schema}.{q_table}\n  where application = {q_app} and schemas_type = {q_schemas_type};\n\n  \
             foreach name in array (select array(select distinct unnest(coalesce(recorded, array[]::text[]) || {q_schemas})))\n  \
             loop\n    execute format('drop schema if exists %I{cascade_kw}', name);\n  end loop;\nend;\n"
        );

        format!("do {};\n", pg_dollar_quote("do", Some(&body)))
    }

    pub fn drop_var_schemas(&self, host_type: &str, schemas_type: &str, schemas: &[String], cascade: bool) -> String {
        self.drop_schemas(&self.var_revision_ident(host_type), schemas_type, schemas, cascade)
    }

    pub fn drop_func_schemas(&self, host_type: &str, schemas_type: &str, schemas: &[String], cascade: bool) -> String {
        self.drop_schemas(&self.func_revision_ident(host_type), schemas_type, schemas, cascade)
    }

    /// Snapshots the current revision row into its history table without
    /// touching the current table — used by upgrade before a revision is
    /// about to be superseded, so the row that was current before the
    /// migration ran stays auditable.
    fn arch_revision(&self, table_ident: &str, history_ident: &str, schemas_type: &str) -> String {
        let q_schema = pg_ident_quote(&self.schema_ident());
        let q_table = pg_ident_quote(table_ident);
        let q_history = pg_ident_quote(history_ident);
        let q_app = pg_quote(Some(&self.application));
        let q_schemas_type = pg_quote(Some(schemas_type));

        format!(
            "insert into {q_schema}.{q_history} (application, schemas_type, revision, comment, schemas, datetime)\n\
             select application, schemas_type, revision, comment, schemas, datetime\n\
             from {q_schema}.{q_table}\n\
             where application = {q_app} and schemas_type = {q_schemas_type};\n"
        )
    }

    pub fn arch_var_revision(&self, host_type: &str, schemas_type: &str) -> String {
        self.arch_revision(&self.var_revision_ident(host_type), &self.var_history_ident(host_type), schemas_type)
    }

    pub fn arch_func_revision(&self, host_type: &str, schemas_type: &str) -> String {
        self.arch_revision(&self.func_revision_ident(host_type), &self.func_history_ident(host_type), schemas_type)
    }

    fn fetch_revision_sql(&self, table_ident: &str, schemas_type: &str) -> String {
        let q_schema = pg_ident_quote(&self.schema_ident());
        let q_table = pg_ident_quote(table_ident);
        let q_app = pg_quote(Some(&self.application));
        let q_schemas_type = pg_quote(Some(schemas_type));

        format!(
            "select revision, comment from {q_schema}.{q_table}\n\
             where application = {q_app} and schemas_type = {q_schemas_type};"
        )
    }

    fn fetch_revision(
        &self,
        client: &mut postgres::Client,
        table_ident: &str,
        schemas_type: &str,
    ) -> Result<(Option<String>, Option<String>), postgres::Error> {
        let row = client.query_opt(&self.fetch_revision_sql(table_ident, schemas_type), &[])?;
        Ok(match row {
            Some(row) => (row.get::<_, Option<String>>(0), row.get::<_, Option<String>>(1)),
            None => (None, None),
        })
    }

    /// Queries the host's own bookkeeping table for its currently-recorded
    /// revision and comment. Requires a live connection — used by upgrade
    /// when `--rev` was not given, so the migration path is planned from
    /// the host's actual recorded state.
    pub fn fetch_var_revision(
        &self,
        client: &mut postgres::Client,
        host_type: &str,
        schemas_type: &str,
    ) -> Result<(Option<String>, Option<String>), postgres::Error> {
        self.fetch_revision(client, &self.var_revision_ident(host_type), schemas_type)
    }

    pub fn fetch_func_revision(
        &self,
        client: &mut postgres::Client,
        host_type: &str,
        schemas_type: &str,
    ) -> Result<(Option<String>, Option<String>), postgres::Error> {
        self.fetch_revision(client, &self.func_revision_ident(host_type), schemas_type)
    }
}

fn pg_text_array(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| pg_quote(Some(s))).collect();
    format!("array[{}]::text[]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_ident_normalizes_dashes_and_case() {
        assert_eq!(application_ident("My-App"), "my_app");
    }

    #[test]
    fn ensure_revision_structs_names_five_objects() {
        let rs = RevisionSql::new("my-app");
        let sql = rs.ensure_revision_structs("main");
        assert!(sql.contains("my_app_revision"));
        assert!(sql.contains("my_app_main_var_revision"));
        assert!(sql.contains("my_app_main_func_revision"));
        assert!(sql.contains("my_app_main_var_revision_history"));
        assert!(sql.contains("my_app_main_func_revision_history"));
    }

    #[test]
    fn guard_revision_embeds_expected_and_raises() {
        let rs = RevisionSql::new("app");
        let sql = rs.guard_var_revision("main", "main", Some("r1"));
        assert!(sql.starts_with("do $do$"));
        assert!(sql.contains("'r1'"));
        assert!(sql.contains("for update"));
    }

    #[test]
    fn guard_revision_none_expected_is_null() {
        let rs = RevisionSql::new("app");
        let sql = rs.guard_var_revision("main", "main", None);
        assert!(sql.contains("is distinct from null"));
    }

    #[test]
    fn push_revision_is_single_cte() {
        let rs = RevisionSql::new("app");
        let sql = rs.push_var_revision("main", "main", "r2", Some("deploy"), &["s1".to_string(), "s2".to_string()]);
        assert!(sql.starts_with("with upsert as"));
        assert!(sql.contains("array['s1', 's2']::text[]"));
    }

    #[test]
    fn drop_schemas_respects_cascade_flag() {
        let rs = RevisionSql::new("app");
        let without = rs.drop_var_schemas("main", "main", &["s1".to_string()], false);
        let with = rs.drop_var_schemas("main", "main", &["s1".to_string()], true);
        assert!(!without.contains("cascade"));
        assert!(with.contains("cascade"));
    }

    #[test]
    fn arch_revision_copies_current_row_into_history() {
        let rs = RevisionSql::new("app");
        let sql = rs.arch_var_revision("main", "main");
        assert!(sql.starts_with("insert into"));
        assert!(sql.contains("app_main_var_revision_history"));
        assert!(sql.contains("from \"app_revision\".\"app_main_var_revision\""));
    }

    #[test]
    fn fetch_revision_sql_selects_by_application_and_schemas_type() {
        let rs = RevisionSql::new("app");
        let sql = rs.fetch_revision_sql(&rs.var_revision_ident("main"), "main");
        assert!(sql.starts_with("select revision, comment"));
        assert!(sql.contains("e'app'"));
        assert!(sql.contains("e'main'"));
    }
}
