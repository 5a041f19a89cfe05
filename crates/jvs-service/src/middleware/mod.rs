pub mod requestor;
