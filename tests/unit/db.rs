use relay_hub::db::{db_kind_from_url, rewrite_sql, DbKind};

#[test]
fn test_db_kind_from_url_sqlite() {
    assert_eq!(db_kind_from_url("sqlite://state.sqlite?mode=rwc"), DbKind::Sqlite);
    assert_eq!(db_kind_from_url("SQLite://state.sqlite"), DbKind::Sqlite);
}

#[test]
fn test_db_kind_from_url_postgres() {
    assert_eq!(db_kind_from_url("postgres://localhost/hub"), DbKind::Postgres);
    assert_eq!(db_kind_from_url("postgresql://localhost/hub"), DbKind::Postgres);
}

#[test]
fn test_rewrite_sql_sqlite_untouched() {
    let sql = "UPDATE campaign_recipients SET status = 'processing', attempted_at = ? WHERE id = ? AND status = 'queued'";
    assert_eq!(rewrite_sql(sql, DbKind::Sqlite).as_ref(), sql);
}

#[test]
fn test_rewrite_sql_postgres_numbers_placeholders() {
    let sql = "UPDATE campaign_recipients SET status = 'processing', attempted_at = ? WHERE id = ? AND status = 'queued'";
    assert_eq!(
        rewrite_sql(sql, DbKind::Postgres).as_ref(),
        "UPDATE campaign_recipients SET status = 'processing', attempted_at = $1 WHERE id = $2 AND status = 'queued'"
    );
}

#[test]
fn test_rewrite_sql_postgres_in_list() {
    let sql = "SELECT id FROM contacts WHERE id IN (?,?,?)";
    assert_eq!(
        rewrite_sql(sql, DbKind::Postgres).as_ref(),
        "SELECT id FROM contacts WHERE id IN ($1,$2,$3)"
    );
}

#[test]
fn test_rewrite_sql_postgres_no_placeholders() {
    let sql = "SELECT COUNT(*) AS n FROM threads";
    assert_eq!(rewrite_sql(sql, DbKind::Postgres).as_ref(), sql);
}
