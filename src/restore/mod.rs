pub(crate) mod db_restore; // psql invocation fed from the downloaded dump
