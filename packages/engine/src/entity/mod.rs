pub mod pointer_record;
