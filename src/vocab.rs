pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const OWL: &str = "http://www.w3.org/2002/07/owl#";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const OBO: &str = "http://purl.obolibrary.org/obo/";
pub const OBO_IN_OWL: &str = "http://www.geneontology.org/formats/oboInOwl#";
pub const NCBITAXON_SCHEMA: &str = "http://purl.obolibrary.org/obo/ncbitaxon#";

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
pub const RDFS_COMMENT: &str = "http://www.w3.org/2000/01/rdf-schema#comment";
pub const RDFS_SUBCLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

pub const OWL_ONTOLOGY: &str = "http://www.w3.org/2002/07/owl#Ontology";
pub const OWL_CLASS: &str = "http://www.w3.org/2002/07/owl#Class";
pub const OWL_OBJECT_PROPERTY: &str = "http://www.w3.org/2002/07/owl#ObjectProperty";
pub const OWL_DATATYPE_PROPERTY: &str = "http://www.w3.org/2002/07/owl#DatatypeProperty";
pub const OWL_NAMED_INDIVIDUAL: &str = "http://www.w3.org/2002/07/owl#NamedIndividual";

/// Rank annotation used by the OBO build of NCBI Taxonomy.
pub const NCBITAXON_HAS_RANK: &str = "http://purl.obolibrary.org/obo/ncbitaxon#has_rank";
/// Prefix shared by taxon IRIs and rank IRIs (`NCBITaxon_8825`, `NCBITaxon_species`).
pub const NCBITAXON_PREFIX: &str = "http://purl.obolibrary.org/obo/NCBITaxon_";

/// Prefixes used when compacting IRIs in Turtle and RDF/XML output.
pub const WELL_KNOWN_PREFIXES: &[(&str, &str)] = &[
    ("rdf", RDF),
    ("rdfs", RDFS),
    ("owl", OWL),
    ("xsd", XSD),
    ("obo", OBO),
    ("oboInOwl", OBO_IN_OWL),
    ("ncbitaxon", NCBITAXON_SCHEMA),
];
