//! Warehouse DDL

use crate::models::{Table, STAGING_COLUMNS};

/// Staging position, assigned by the database on insert
pub const STAGING_SEQUENCE_COLUMN: &str = "staging_seq";

/// Drop order: everything the pipeline owns
pub fn drop_statements() -> Vec<String> {
    Table::ALL
        .iter()
        .map(|table| format!("DROP TABLE IF EXISTS {}", table))
        .collect()
}

/// Valid staged rows in the order they were staged
pub fn valid_staged_query() -> String {
    format!(
        "SELECT {} FROM {} WHERE valid_yn_flag = 'Y' ORDER BY {}",
        STAGING_COLUMNS.join(", "),
        Table::ImmigrationStaging,
        STAGING_SEQUENCE_COLUMN
    )
}

pub fn create_statement(table: Table) -> &'static str {
    match table {
        Table::CountryDim => {
            r#"
            CREATE TABLE IF NOT EXISTS i94_country_desc_dim (
                country_id INTEGER PRIMARY KEY,
                country_desc VARCHAR(250) NOT NULL
            )
            "#
        },
        Table::AddressDim => {
            r#"
            CREATE TABLE IF NOT EXISTS i94_address_desc_dim (
                address_code VARCHAR(10) PRIMARY KEY,
                address_desc VARCHAR(250) NOT NULL
            )
            "#
        },
        Table::AirportDim => {
            r#"
            CREATE TABLE IF NOT EXISTS i94_airport_desc_dim (
                airport_code VARCHAR(10) PRIMARY KEY,
                airport_desc VARCHAR(250) NOT NULL
            )
            "#
        },
        Table::TravelModeDim => {
            r#"
            CREATE TABLE IF NOT EXISTS i94_travel_mode_dim (
                travel_mode_cd INTEGER PRIMARY KEY,
                travel_mode_desc VARCHAR(50) NOT NULL
            )
            "#
        },
        Table::ImmigrationStaging => {
            r#"
            CREATE TABLE IF NOT EXISTS i94_immigration_data_stg (
                cicid VARCHAR(20),
                i94yr VARCHAR(20),
                i94mon VARCHAR(20),
                i94cit VARCHAR(20),
                i94res VARCHAR(20),
                i94port VARCHAR(5),
                arrdate VARCHAR(20),
                i94mode VARCHAR(20),
                i94addr VARCHAR(5),
                depdate VARCHAR(20),
                i94bir VARCHAR(20),
                i94visa VARCHAR(20),
                count VARCHAR(20),
                dtadfile VARCHAR(10),
                visapost VARCHAR(10),
                occup VARCHAR(100),
                entdepa VARCHAR(10),
                entdepd VARCHAR(10),
                entdepu VARCHAR(10),
                matflag VARCHAR(10),
                biryear VARCHAR(20),
                dtaddto VARCHAR(10),
                gender VARCHAR(10),
                insnum VARCHAR(20),
                airline VARCHAR(20),
                admnum VARCHAR(20),
                fltno VARCHAR(20),
                visatype VARCHAR(20),
                valid_yn_flag CHAR(1),
                staging_seq BIGSERIAL
            )
            "#
        },
        Table::ImmigrationFact => {
            r#"
            CREATE TABLE IF NOT EXISTS i94_immigration_data_fact (
                cicid INTEGER PRIMARY KEY,
                i94cit INTEGER,
                i94res INTEGER,
                i94port VARCHAR(5),
                arrdate INTEGER,
                i94mode INTEGER,
                i94addr VARCHAR(5),
                depdate INTEGER,
                i94visa INTEGER,
                airline VARCHAR(20),
                fltno VARCHAR(20),
                visatype VARCHAR(10)
            )
            "#
        },
        Table::TimeDim => {
            r#"
            CREATE TABLE IF NOT EXISTS time_dim (
                sas_date_value INTEGER PRIMARY KEY,
                formatted_date DATE NOT NULL,
                year INTEGER,
                month INTEGER,
                day VARCHAR(20)
            )
            "#
        },
        // `bithyear` is the published column name
        Table::PersonDim => {
            r#"
            CREATE TABLE IF NOT EXISTS person_dim (
                cicid INTEGER PRIMARY KEY,
                gender CHAR(1),
                bithyear INTEGER,
                age INTEGER
            )
            "#
        },
        Table::TemperatureFact => {
            r#"
            CREATE TABLE IF NOT EXISTS city_temperature_data_fact (
                dt DATE,
                averagetemperature DOUBLE PRECISION,
                averagetemperatureuncertainty DOUBLE PRECISION,
                city VARCHAR(50),
                country VARCHAR(50),
                latitude VARCHAR(20),
                longitude VARCHAR(20),
                PRIMARY KEY (dt, city, country)
            )
            "#
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_has_ddl_naming_it() {
        for table in Table::ALL {
            assert!(create_statement(table).contains(table.name()), "{}", table);
        }
        assert_eq!(drop_statements().len(), Table::ALL.len());
    }

    #[test]
    fn test_key_columns_match_ddl() {
        for table in Table::ALL {
            let ddl = create_statement(table);
            for key in table.key_columns() {
                assert!(ddl.contains(key), "{} lacks {}", table, key);
            }
        }
        assert!(create_statement(Table::TemperatureFact).contains("PRIMARY KEY (dt, city, country)"));
    }

    #[test]
    fn test_valid_rows_come_back_in_staging_order() {
        assert!(create_statement(Table::ImmigrationStaging).contains("staging_seq BIGSERIAL"));
        let query = valid_staged_query();
        assert!(query.starts_with("SELECT cicid, i94yr,"));
        assert!(query.ends_with("WHERE valid_yn_flag = 'Y' ORDER BY staging_seq"));
    }
}
