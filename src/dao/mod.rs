pub mod instrument_dao;
