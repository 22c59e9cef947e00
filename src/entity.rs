// ABOUTME: Static per-entity sync configuration and the seven entity definitions
// ABOUTME: One EntitySpec drives extraction, normalization, and SQL generation generically

use serde_json::Value;

/// Where an entity's raw records come from.
pub enum Source {
    /// A paged listing endpoint, fetched page by page until an empty page.
    Paged { path: &'static str },
    /// A per-parent child endpoint. `{parent}` is replaced by each parent id.
    PerParent { template: &'static str },
    /// No fetch of its own. Rows are carved out of the parent entity's raw records.
    Embedded,
}

/// How a row's primary key is derived.
pub enum KeyRule {
    /// Natural key: the integer at this source path in the raw record.
    Natural(&'static str),
    /// Synthetic key: the digit characters of the listed target columns,
    /// concatenated in order and parsed as i64. Deterministic but not
    /// collision-free; a value that overflows i64 is fatal for that record.
    Digits(&'static [&'static str]),
}

/// One source-path-to-column mapping. Paths are dot-addressed into nested objects.
pub struct FieldMap {
    pub path: &'static str,
    pub column: &'static str,
}

/// What to do with a record whose multi-valued field has no elements.
pub enum EmptyPolicy {
    /// Emit one row with the element sub-fields nulled.
    Keep,
    /// Emit nothing for that record.
    Drop,
}

/// Expands a record with a list-valued field into one row per element.
pub struct Explode {
    pub field: &'static str,
    pub on_empty: EmptyPolicy,
}

/// A column computed from the raw record instead of mapped from it.
pub enum Derived {
    /// The leading `count` decimal digits of the value at `path`.
    LeadingDigits {
        path: &'static str,
        column: &'static str,
        count: usize,
    },
}

/// Which identifiers an entity exports to dependent child fetches.
pub enum ExportIds {
    /// The row keys themselves.
    Keys,
    /// The integer values of a named column.
    Column(&'static str),
}

/// Static configuration for one synchronized entity.
///
/// The key column is carried on the row itself and must not appear in `fields`;
/// the applier adds it to inserts and uses it to address updates and deletes.
pub struct EntitySpec {
    pub name: &'static str,
    pub table: &'static str,
    pub source: Source,
    pub key: KeyRule,
    pub key_column: &'static str,
    pub fields: &'static [FieldMap],
    /// Target columns parsed from the wire timestamp format and rewritten in
    /// the store's seconds-precision form.
    pub date_columns: &'static [&'static str],
    /// Target columns that get markup tags stripped.
    pub sanitize_columns: &'static [&'static str],
    /// Tag names removed from sanitized columns, as literal `<tag>`/`</tag>` pairs.
    pub strip_tags: &'static [&'static str],
    pub explode: Option<Explode>,
    pub derived: &'static [Derived],
    /// Raw records failing this predicate are excluded before normalization.
    pub raw_filter: Option<fn(&Value) -> bool>,
    pub export_ids: Option<ExportIds>,
}

/// Assessments below this identifier predate the mirrored store and are not synced.
const MIN_ASSESSMENT_ID: i64 = 193;

/// Store column width for a task's phase name.
const MAX_PHASE_NAME_LEN: usize = 50;

fn assessment_in_range(record: &Value) -> bool {
    record
        .get("id")
        .and_then(Value::as_i64)
        .is_some_and(|id| id >= MIN_ASSESSMENT_ID)
}

fn phase_name_fits(record: &Value) -> bool {
    record
        .pointer("/fase/nome")
        .and_then(Value::as_str)
        .is_none_or(|name| name.chars().count() <= MAX_PHASE_NAME_LEN)
}

pub static PROJECTS: EntitySpec = EntitySpec {
    name: "projects",
    table: "projects",
    source: Source::Paged { path: "projeto" },
    key: KeyRule::Natural("id"),
    key_column: "id",
    fields: &[
        FieldMap { path: "nome", column: "name" },
        FieldMap { path: "ativo", column: "active" },
        FieldMap { path: "pausado", column: "paused" },
        FieldMap { path: "concluido", column: "completed" },
        FieldMap { path: "dtCriacao", column: "created_at" },
        FieldMap { path: "dtInicio", column: "started_at" },
        FieldMap { path: "dtFim", column: "finished_at" },
        FieldMap { path: "modelo.id", column: "template_id" },
        FieldMap { path: "modelo.nome", column: "template_name" },
        FieldMap { path: "responsavel.id", column: "owner_id" },
        FieldMap { path: "responsavel.nome", column: "owner_name" },
    ],
    date_columns: &["created_at", "started_at", "finished_at"],
    sanitize_columns: &[],
    strip_tags: &[],
    explode: None,
    derived: &[],
    raw_filter: None,
    export_ids: Some(ExportIds::Keys),
};

pub static TASKS: EntitySpec = EntitySpec {
    name: "tasks",
    table: "tasks",
    source: Source::PerParent {
        template: "projeto/{parent}/tarefa",
    },
    key: KeyRule::Natural("id"),
    key_column: "id",
    fields: &[
        FieldMap { path: "nome", column: "name" },
        FieldMap { path: "descricaoHtml", column: "description" },
        FieldMap { path: "dtCriacao", column: "created_at" },
        FieldMap { path: "dtInicio", column: "started_at" },
        FieldMap { path: "dtFim", column: "due_at" },
        FieldMap { path: "dtConclusao", column: "completed_at" },
        FieldMap { path: "parentId", column: "project_id" },
        FieldMap { path: "fase.id", column: "phase_id" },
        FieldMap { path: "fase.nome", column: "phase_name" },
        FieldMap { path: "responsavel.id", column: "owner_id" },
        FieldMap { path: "responsavel.nome", column: "owner_name" },
    ],
    date_columns: &["created_at", "started_at", "due_at", "completed_at"],
    sanitize_columns: &["description"],
    strip_tags: &["p", "ul", "li"],
    explode: None,
    derived: &[],
    raw_filter: Some(phase_name_fits),
    export_ids: None,
};

pub static LEADS: EntitySpec = EntitySpec {
    name: "leads",
    table: "leads",
    source: Source::Paged {
        path: "expansao/negocio",
    },
    key: KeyRule::Digits(&["lead_id", "tag_id"]),
    key_column: "id",
    fields: &[
        FieldMap { path: "id", column: "lead_id" },
        FieldMap { path: "titulo", column: "title" },
        FieldMap { path: "descricao", column: "description" },
        FieldMap { path: "dtCadastro", column: "registered_at" },
        FieldMap { path: "dtConclusao", column: "completed_at" },
        FieldMap { path: "cidade", column: "city" },
        FieldMap { path: "uf", column: "state" },
        FieldMap { path: "valor", column: "value" },
        FieldMap { path: "situacaoPerdaMotivoObservacao", column: "loss_note" },
        FieldMap { path: "situacaoPerdaMotivo.id", column: "loss_reason_id" },
        FieldMap { path: "situacaoPerdaMotivo.nome", column: "loss_reason_name" },
        FieldMap { path: "situacaoPerdaMotivo.descricao", column: "loss_reason_description" },
        FieldMap { path: "situacao.id", column: "status_id" },
        FieldMap { path: "situacao.nome", column: "status_name" },
        FieldMap { path: "etapa.id", column: "stage_id" },
        FieldMap { path: "etapa.nome", column: "stage_name" },
        FieldMap { path: "etapa.funil.id", column: "funnel_id" },
        FieldMap { path: "etapa.funil.nome", column: "funnel_name" },
        FieldMap { path: "campanha", column: "campaign" },
        FieldMap { path: "origem.id", column: "source_id" },
        FieldMap { path: "origem.nome", column: "source_name" },
        FieldMap { path: "temperatura.id", column: "temperature_id" },
        FieldMap { path: "temperatura.nome", column: "temperature_name" },
        FieldMap { path: "responsavel.id", column: "owner_id" },
        FieldMap { path: "responsavel.nome", column: "owner_name" },
        FieldMap { path: "etiqueta.id", column: "tag_id" },
        FieldMap { path: "etiqueta.nome", column: "tag_name" },
        FieldMap { path: "etiqueta.cor", column: "tag_color" },
    ],
    date_columns: &["registered_at", "completed_at"],
    sanitize_columns: &[],
    strip_tags: &[],
    explode: Some(Explode {
        field: "etiqueta",
        on_empty: EmptyPolicy::Keep,
    }),
    derived: &[],
    raw_filter: None,
    export_ids: Some(ExportIds::Column("lead_id")),
};

pub static TIMELINES: EntitySpec = EntitySpec {
    name: "timelines",
    table: "timelines",
    source: Source::PerParent {
        template: "expansao/negocio/{parent}/timeline",
    },
    key: KeyRule::Digits(&["created_at", "lead_id"]),
    key_column: "id",
    fields: &[
        FieldMap { path: "criado", column: "created_at" },
        FieldMap { path: "tipo", column: "entry_type" },
        FieldMap { path: "parentId", column: "lead_id" },
        FieldMap { path: "pessoa.id", column: "person_id" },
        FieldMap { path: "pessoa.nome", column: "person_name" },
        FieldMap { path: "anotacao.id", column: "note_id" },
        FieldMap { path: "anotacao.descricaoHtml", column: "note_text" },
        FieldMap { path: "anotacao.dtAnotacao", column: "note_at" },
        FieldMap { path: "anotacao.editavel", column: "note_editable" },
    ],
    date_columns: &["created_at", "note_at"],
    sanitize_columns: &["note_text"],
    strip_tags: &["p", "u", "ul", "li", "strong"],
    explode: None,
    derived: &[],
    raw_filter: None,
    export_ids: None,
};

pub static ASSESSMENTS: EntitySpec = EntitySpec {
    name: "assessments",
    table: "assessments",
    source: Source::Paged {
        path: "checklist/avaliacao",
    },
    key: KeyRule::Natural("id"),
    key_column: "id",
    fields: &[
        FieldMap { path: "dtInicio", column: "started_at" },
        FieldMap { path: "dtFim", column: "finished_at" },
        FieldMap { path: "dtCriacao", column: "created_at" },
        FieldMap { path: "dtPrazo", column: "due_at" },
        FieldMap { path: "modelo.id", column: "template_id" },
        FieldMap { path: "modelo.nome", column: "template_name" },
        FieldMap { path: "responsavel.id", column: "owner_id" },
        FieldMap { path: "responsavel.nome", column: "owner_name" },
        FieldMap { path: "pontuacaoAlcancada", column: "score_achieved" },
        FieldMap { path: "pontuacaoMaxima", column: "score_maximum" },
    ],
    date_columns: &["started_at", "finished_at", "created_at", "due_at"],
    sanitize_columns: &[],
    strip_tags: &[],
    explode: None,
    // The store number groups assessments by site; several assessments can share
    // one store number, so it is an attribute, never the key.
    derived: &[Derived::LeadingDigits {
        path: "id",
        column: "store_number",
        count: 3,
    }],
    raw_filter: Some(assessment_in_range),
    export_ids: Some(ExportIds::Keys),
};

pub static ANSWERS: EntitySpec = EntitySpec {
    name: "answers",
    table: "answers",
    source: Source::PerParent {
        template: "checklist/avaliacao/{parent}/resposta",
    },
    key: KeyRule::Natural("id"),
    key_column: "id",
    fields: &[
        FieldMap { path: "parentId", column: "assessment_id" },
        FieldMap { path: "questao", column: "question" },
        FieldMap { path: "resposta", column: "answer" },
        FieldMap { path: "comentario", column: "comment" },
        FieldMap { path: "pontuacaoAlcancada", column: "score_achieved" },
        FieldMap { path: "pontuacaoMaxima", column: "score_maximum" },
    ],
    date_columns: &[],
    sanitize_columns: &[],
    strip_tags: &[],
    explode: None,
    derived: &[],
    raw_filter: None,
    export_ids: None,
};

pub static ATTACHMENTS: EntitySpec = EntitySpec {
    name: "attachments",
    table: "attachments",
    source: Source::Embedded,
    key: KeyRule::Natural("anexo.id"),
    key_column: "id",
    fields: &[
        FieldMap { path: "id", column: "answer_id" },
        FieldMap { path: "anexo.nome", column: "file_name" },
        FieldMap { path: "anexo.url", column: "url" },
        FieldMap { path: "anexo.dtCriacao", column: "created_at" },
        FieldMap { path: "anexo.tamanho", column: "size_bytes" },
    ],
    date_columns: &["created_at"],
    sanitize_columns: &[],
    strip_tags: &[],
    explode: Some(Explode {
        field: "anexo",
        on_empty: EmptyPolicy::Drop,
    }),
    derived: &[],
    raw_filter: None,
    export_ids: None,
};
