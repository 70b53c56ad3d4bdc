diesel::table! {
    departments (department_id) {
        department_id -> Uuid,
        name -> Varchar,
        parent_department_id -> Nullable<Uuid>,
        is_active -> Bool,
        deleted_by -> Nullable<Uuid>,
        is_updated -> Bool,
        updated_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    persons (person_id) {
        person_id -> Uuid,
        first_name -> Varchar,
        last_name -> Varchar,
        email -> Varchar,
        phone -> Nullable<Varchar>,
        department_id -> Nullable<Uuid>,
        is_active -> Bool,
        deleted_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    users (user_id) {
        user_id -> Uuid,
        email -> Varchar,
        password_hash -> Varchar,
        role -> Varchar,
        person_id -> Nullable<Uuid>,
        refresh_token -> Nullable<Text>,
        refresh_token_expires_at -> Nullable<Timestamptz>,
        first_name -> Nullable<Varchar>,
        last_name -> Nullable<Varchar>,
        phone -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    customers (customer_id) {
        customer_id -> Uuid,
        first_name -> Varchar,
        last_name -> Varchar,
        email -> Varchar,
        phone -> Nullable<Varchar>,
    }
}

diesel::table! {
    categories (category_id) {
        category_id -> Uuid,
        category_key -> Varchar,
        display_name -> Varchar,
        target_department_id -> Nullable<Uuid>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (ticket_id) {
        ticket_id -> Uuid,
        issue -> Text,
        priority -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
        closed_at -> Nullable<Timestamptz>,
        is_employee -> Bool,
        creator_customer_id -> Nullable<Uuid>,
        creator_person_id -> Nullable<Uuid>,
    }
}

diesel::table! {
    ticket_assignments (assignment_id) {
        assignment_id -> Uuid,
        ticket_id -> Uuid,
        is_in_pool -> Bool,
        department_id -> Nullable<Uuid>,
        person_id -> Nullable<Uuid>,
        status -> Varchar,
        assigned_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(ticket_assignments -> tickets (ticket_id));
diesel::allow_tables_to_appear_in_same_query!(tickets, ticket_assignments);
