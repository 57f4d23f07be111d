pub mod external_links_builder;
