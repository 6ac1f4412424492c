//! Stage-by-stage pipeline behaviour against the in-memory warehouse

mod common;

use common::{
    arrival, init_test_tracing, raw_record, write_file, AIRPORT_CODES, COUNTRY_CODES,
    TEMPERATURE_HEADER,
};
use i94_etl::error::EtlError;
use i94_etl::models::{ConflictPolicy, PersonRow, ReferenceCode, ReferenceKind, Table};
use i94_etl::pipeline::climate::{climate_selection, load_temperatures};
use i94_etl::pipeline::populate::populate;
use i94_etl::pipeline::quality::{check_row_count, run_quality_gate, QualityCheck};
use i94_etl::pipeline::reference::load_reference;
use i94_etl::pipeline::staging::load_staging;
use i94_etl::pipeline::tagger::tag_valid_ports;
use i94_etl::session::{MemorySession, WarehouseSession};
use i94_etl::sources::{CodeFileSource, CsvSource, RawRecord};

async fn seeded_airports(session: &mut MemorySession) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let airports = CodeFileSource::new(write_file(dir.path(), "I94_airport_description.txt", AIRPORT_CODES));
    load_reference(session, ReferenceKind::Airport, &airports)
        .await
        .unwrap();
    dir
}

#[tokio::test]
async fn test_end_to_end_atl_scenario() {
    init_test_tracing();
    let mut session = MemorySession::new();
    let _dir = seeded_airports(&mut session).await;

    let staged: Vec<RawRecord> = vec![raw_record(&[
        ("cicid", "5.0"),
        ("i94port", "ATL"),
        ("arrdate", "1082.0"),
        ("gender", "M"),
        ("biryear", "1990.0"),
        ("i94bir", "30.0"),
    ])];
    load_staging(&mut session, &staged).await.unwrap();
    assert_eq!(tag_valid_ports(&mut session).await.unwrap(), 1);

    let summary = populate(&mut session).await.unwrap();
    assert_eq!(summary.valid_rows, 1);

    let facts = session.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!((facts[0].cicid, facts[0].arrdate), (5, 1082));

    assert_eq!(
        session.persons(),
        vec![PersonRow {
            cicid: 5,
            gender: Some("M".to_string()),
            birth_year: 1990,
            age: 30,
        }]
    );

    let times = session.time_rows();
    assert_eq!(times.len(), 1);
    assert_eq!(times[0].sas_date_value, 1082);
}

#[tokio::test]
async fn test_reloading_code_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        dir.path(),
        "I94_country_code.txt",
        &format!("{}   582 =  'MEXICO again'\n", COUNTRY_CODES),
    );
    let source = CodeFileSource::new(path);
    let mut session = MemorySession::new();

    let first = load_reference(&mut session, ReferenceKind::Country, &source)
        .await
        .unwrap();
    let second = load_reference(&mut session, ReferenceKind::Country, &source)
        .await
        .unwrap();

    assert_eq!(first.read, 4);
    assert_eq!(first.written, 3);
    assert_eq!(second.written, 0);

    let rows = session.references(ReferenceKind::Country);
    assert_eq!(rows.len(), 3);
    let mexico = rows
        .iter()
        .find(|r| r.code == ReferenceCode::Numeric(582))
        .unwrap();
    assert!(mexico.description.starts_with("MEXICO Air Sea"));
}

#[tokio::test]
async fn test_only_rows_with_known_port_are_populated() {
    let mut session = MemorySession::new();
    let _dir = seeded_airports(&mut session).await;

    let staged = vec![arrival("1.0", "ATL"), arrival("2.0", "ZZZ"), arrival("3.0", "BOS")];
    load_staging(&mut session, &staged).await.unwrap();

    assert_eq!(tag_valid_ports(&mut session).await.unwrap(), 2);
    // unchanged airport dimension: nothing new to tag
    assert_eq!(tag_valid_ports(&mut session).await.unwrap(), 0);

    populate(&mut session).await.unwrap();
    let cicids: Vec<i32> = session.facts().iter().map(|f| f.cicid).collect();
    assert_eq!(cicids, vec![1, 3]);
    assert_eq!(session.count_rows(Table::ImmigrationStaging).await.unwrap(), 3);
}

#[tokio::test]
async fn test_port_added_after_tagging_does_not_count() {
    let mut session = MemorySession::new();
    let dir = seeded_airports(&mut session).await;

    load_staging(&mut session, &vec![arrival("1.0", "SFR")]).await.unwrap();
    tag_valid_ports(&mut session).await.unwrap();

    let late = CodeFileSource::new(write_file(dir.path(), "late.txt", "'SFR' = 'SAN FRANCISCO, CA'\n"));
    load_reference(&mut session, ReferenceKind::Airport, &late)
        .await
        .unwrap();

    let summary = populate(&mut session).await.unwrap();
    assert_eq!(summary.valid_rows, 0);
    assert!(session.facts().is_empty());
}

#[tokio::test]
async fn test_time_dimension_distinct_offsets() {
    let mut session = MemorySession::new();
    let _dir = seeded_airports(&mut session).await;

    let staged = vec![
        raw_record(&[("cicid", "1.0"), ("arrdate", "100.0"), ("depdate", "")]),
        raw_record(&[("cicid", "2.0"), ("arrdate", "100.0"), ("depdate", "110.0")]),
        raw_record(&[("cicid", "3.0"), ("arrdate", "105.0"), ("depdate", "")]),
    ];
    load_staging(&mut session, &staged).await.unwrap();
    tag_valid_ports(&mut session).await.unwrap();
    populate(&mut session).await.unwrap();

    let rows = session.time_rows();
    let offsets: Vec<i32> = rows.iter().map(|r| r.sas_date_value).collect();
    assert_eq!(offsets, vec![100, 105, 110]);
    assert_eq!(rows[2].formatted_date.to_string(), "1960-04-20");

    let facts = session.facts();
    assert_eq!(facts[1].depdate, Some(110));
    assert_eq!(facts[0].depdate, None);
}

#[tokio::test]
async fn test_person_upsert_updates_age_only() {
    let mut session = MemorySession::new();
    let original = PersonRow {
        cicid: 5,
        gender: Some("M".to_string()),
        birth_year: 1990,
        age: 30,
    };
    session
        .upsert_persons(&[original.clone()], ConflictPolicy::UpdateAge)
        .await
        .unwrap();

    // identical reload leaves the row as it was
    session
        .upsert_persons(&[original.clone()], ConflictPolicy::UpdateAge)
        .await
        .unwrap();
    assert_eq!(session.persons(), vec![original.clone()]);

    let changed = PersonRow {
        gender: Some("F".to_string()),
        birth_year: 1991,
        age: 31,
        ..original.clone()
    };
    session
        .upsert_persons(&[changed], ConflictPolicy::UpdateAge)
        .await
        .unwrap();
    assert_eq!(session.persons(), vec![PersonRow { age: 31, ..original }]);
}

#[tokio::test]
async fn test_malformed_value_aborts_fact_population() {
    let mut session = MemorySession::new();
    let _dir = seeded_airports(&mut session).await;

    let staged = vec![arrival("1.0", "ATL"), raw_record(&[("cicid", "2.0"), ("i94visa", "B")])];
    load_staging(&mut session, &staged).await.unwrap();
    tag_valid_ports(&mut session).await.unwrap();

    let err = populate(&mut session).await.unwrap_err();
    assert!(matches!(err, EtlError::Decode { column: "i94visa", .. }));
    assert!(session.facts().is_empty());
}

#[tokio::test]
async fn test_wrong_width_record_stages_nothing() {
    let mut session = MemorySession::new();
    let staged = vec![arrival("1.0", "ATL"), vec!["5.0".to_string(), "ATL".to_string()]];

    let err = load_staging(&mut session, &staged).await.unwrap_err();
    assert!(matches!(err, EtlError::Format { .. }));
    assert!(session.staged().is_empty());
}

#[tokio::test]
async fn test_temperatures_filtered_and_duplicates_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        dir.path(),
        "GlobalLandTemperaturesByCity.csv",
        &format!(
            "{}1820-01-01,2.101,3.217,Abilene,United States,32.95N,100.53W\n\
             1820-01-01,7.0,1.0,Århus,Denmark,57.05N,10.33E\n\
             1820-02-01,,,Abilene,United States,32.95N,100.53W\n",
            TEMPERATURE_HEADER
        ),
    );
    let mut session = MemorySession::new();

    let source = CsvSource::new(&path, climate_selection("United States", 20000));
    let summary = load_temperatures(&mut session, &source).await.unwrap();
    assert_eq!(summary.written, 2);
    assert!(session.temperatures().iter().all(|t| t.country == "United States"));
    assert_eq!(session.temperatures()[1].average_temperature, None);

    // same keys again: rejected, nothing new committed
    let err = load_temperatures(&mut session, &source).await.unwrap_err();
    assert!(matches!(err, EtlError::Constraint(_)));
    assert_eq!(session.count_rows(Table::TemperatureFact).await.unwrap(), 2);
}

#[tokio::test]
async fn test_quality_gate_threshold_boundary() {
    let mut session = MemorySession::new();
    let _dir = seeded_airports(&mut session).await;

    let staged: Vec<RawRecord> = (1..=2000)
        .map(|i| arrival(&format!("{}.0", i), "ATL"))
        .collect();
    load_staging(&mut session, &staged).await.unwrap();
    tag_valid_ports(&mut session).await.unwrap();
    populate(&mut session).await.unwrap();

    let at = check_row_count(&mut session, QualityCheck::new(Table::ImmigrationFact, 2000))
        .await
        .unwrap();
    assert!(at.passed);
    assert_eq!(at.actual_rows, 2000);

    let above = check_row_count(&mut session, QualityCheck::new(Table::ImmigrationFact, 2001))
        .await
        .unwrap();
    assert!(!above.passed);
}

#[tokio::test]
async fn test_quality_gate_one_short_fails_without_error() {
    let mut session = MemorySession::new();
    let _dir = seeded_airports(&mut session).await;

    let staged: Vec<RawRecord> = (1..=1999)
        .map(|i| arrival(&format!("{}.0", i), "ATL"))
        .collect();
    load_staging(&mut session, &staged).await.unwrap();
    tag_valid_ports(&mut session).await.unwrap();
    populate(&mut session).await.unwrap();

    let verdicts = run_quality_gate(
        &mut session,
        &[
            QualityCheck::new(Table::ImmigrationFact, 2000),
            QualityCheck::new(Table::TemperatureFact, 2000),
        ],
    )
    .await
    .unwrap();
    assert_eq!(verdicts.len(), 2);
    assert!(verdicts.iter().all(|v| !v.passed));
    // the committed rows stay
    assert_eq!(session.facts().len(), 1999);
}

#[tokio::test]
async fn test_quality_gate_unreachable_table_raises() {
    let mut session = MemorySession::new();
    session.drop_table(Table::TemperatureFact);

    let result = run_quality_gate(&mut session, &[QualityCheck::new(Table::TemperatureFact, 1)]).await;
    assert!(result.is_err());
}
