mod versioned_schema;

pub use versioned_schema::{
    check_schema_ordering, open_database, prepare_database, Column, ForeignKey,
    ForeignKeyOnChange, SqlType, Table, VersionedSchema, BASE_DB_VERSION, DEFAULT_TIMESTAMP,
};
