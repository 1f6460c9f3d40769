// Esquema Diesel compartido por SQLite y Postgres.
// Tabla: process_documents (un documento JSON por instancia de proceso).
diesel::table! {
    process_documents (id) {
        id -> Text,
        process_name -> Text,
        process_id -> Text,
        saved -> BigInt,
        updated -> BigInt,
        body -> Text,
    }
}
