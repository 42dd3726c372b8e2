mod helpers;

mod integrity_tests;
