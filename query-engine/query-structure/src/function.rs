use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbFunction {
    pub comment: String,
    pub schema: String,
    pub name: String,
    /// Return type. Functions returning `record` with outputs are exposed as tables.
    #[serde(rename = "type")]
    pub ty: String,
    pub agg: bool,
    pub inputs: Vec<FunctionParam>,
    pub outputs: Vec<FunctionParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionParam {
    pub id: i32,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub array: bool,
}

impl DbFunction {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            ty: ty.into(),
            ..Default::default()
        }
    }

    /// Single argument function usable as `<name>_<column>` in a selection.
    pub fn aggregate(schema: impl Into<String>, name: impl Into<String>, ty: impl Into<String>) -> Self {
        let mut func = Self::new(schema, name, ty);
        func.agg = true;
        func.inputs.push(FunctionParam {
            id: 0,
            name: "value".to_owned(),
            ty: "any".to_owned(),
            array: false,
        });
        func
    }

    pub fn input(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        let id = self.inputs.len() as i32;

        self.inputs.push(FunctionParam {
            id,
            name: name.into(),
            ty: ty.into(),
            array: false,
        });

        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        let id = self.outputs.len() as i32;

        self.outputs.push(FunctionParam {
            id,
            name: name.into(),
            ty: ty.into(),
            array: false,
        });

        self
    }

    pub fn returns_table(&self) -> bool {
        self.ty == "record" && !self.outputs.is_empty()
    }
}
